//! Provider binary resolution, download, verification, and caching.
//!
//! Each provider declares the executables its commands invoke, per OS/arch,
//! as a local path, a bare name, or an HTTP(S) URL (optionally pointing
//! inside an archive). `BinaryResolver` installs them under the per-context
//! binaries directory and mirrors URL downloads into a cross-workspace cache
//! keyed by a hash of the source URL.
//!
//! The HTTP client and retry policy are owned by the resolver and injected
//! at construction — there is no process-global download state.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::application::ports::ProgressReporter;
use crate::domain::error::DownloadError;
use crate::domain::provider::{ProviderBinary, current_platform};
use crate::output::progress;

/// Directory name of the shared cross-workspace cache under the temp dir.
const CACHE_DIR_NAME: &str = "berth-binaries";

/// Length of the URL-hash prefix used as cache key.
const CACHE_KEY_LEN: usize = 16;

/// Bounded exponential backoff for transient download failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based, counting failures so far).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// A policy that never sleeps, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Archive formats the resolver can extract a member from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

fn archive_kind(url: &str) -> Option<ArchiveKind> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if path.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else if path.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else {
        None
    }
}

/// Downloads, verifies, and caches provider-declared executables.
#[derive(Clone)]
pub struct BinaryResolver {
    agent: ureq::Agent,
    backoff: BackoffPolicy,
    cache_dir: PathBuf,
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new(
            ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(30))
                .build(),
            BackoffPolicy::default(),
            std::env::temp_dir().join(CACHE_DIR_NAME),
        )
    }
}

impl BinaryResolver {
    /// Build a resolver with an explicit HTTP agent, retry policy, and cache
    /// directory (tests inject all three).
    #[must_use]
    pub fn new(agent: ureq::Agent, backoff: BackoffPolicy, cache_dir: PathBuf) -> Self {
        Self {
            agent,
            backoff,
            cache_dir,
        }
    }

    /// Install every declared binary for the running platform under
    /// `target_dir` and return the `NAME=path` bindings for the command
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a binary has no entry for the running platform,
    /// a download fails permanently or exhausts its retries, or a declared
    /// checksum does not match.
    pub fn download_binaries(
        &self,
        binaries: &BTreeMap<String, Vec<ProviderBinary>>,
        target_dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut resolved = BTreeMap::new();
        for (name, entries) in binaries {
            let entry = platform_entry(name, entries)?;
            let file_name = entry
                .name
                .clone()
                .unwrap_or_else(|| name.to_ascii_lowercase());
            let target = target_dir
                .join(name.to_ascii_lowercase())
                .join(&file_name);
            self.resolve_one(name, entry, &target, reporter)
                .with_context(|| format!("resolving binary '{name}'"))?;
            resolved.insert(name.clone(), target);
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        name: &str,
        entry: &ProviderBinary,
        target: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        // A checksummed copy already in place is used as-is.
        if let Some(expected) = &entry.checksum {
            if target.exists() && checksum_matches(target, expected)? {
                return Ok(());
            }
        }

        let is_url =
            entry.path.starts_with("http://") || entry.path.starts_with("https://");

        // Checksum-valid cache hit: copy into place without touching the network.
        if is_url {
            if let Some(expected) = &entry.checksum {
                let cached = self.cache_path(&entry.path, target);
                if cached.exists() && checksum_matches(&cached, expected)? {
                    install_copy(&cached, target)?;
                    return Ok(());
                }
            }
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        if is_url {
            self.fetch_with_retry(name, entry, target, reporter)?;
        } else if Path::new(&entry.path).is_absolute() {
            copy_local(Path::new(&entry.path), target, name)?;
        } else {
            // Bare name: something else must already have put it in place.
            if !target.exists() {
                return Err(DownloadError::MissingLocal {
                    name: name.to_string(),
                    path: entry.path.clone(),
                }
                .into());
            }
        }

        if let Some(expected) = &entry.checksum {
            verify_or_delete(target, expected)?;
        }
        set_executable(target)?;

        // Mirror URL downloads into the shared cache. Lost cache writes are
        // acceptable; corrupted entries are not, hence the copy is re-verified
        // by checksum on every reuse above.
        if is_url {
            let cached = self.cache_path(&entry.path, target);
            if let Err(e) = install_copy(target, &cached) {
                reporter.warn(&format!("could not populate binary cache: {e:#}"));
            }
        }
        Ok(())
    }

    /// Shared cache location for a URL: `<cache>/<sha256(url)[..16]>/<file>`.
    fn cache_path(&self, url: &str, target: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let key = hex_encode(&hasher.finalize())[..CACHE_KEY_LEN].to_string();
        let file_name = target
            .file_name()
            .map_or_else(|| "binary".into(), std::ffi::OsStr::to_os_string);
        self.cache_dir.join(key).join(file_name)
    }

    /// Download with bounded backoff. Permanent failures (checksum mismatch,
    /// 4xx except 408/429) abort immediately and delete any partial artifact.
    fn fetch_with_retry(
        &self,
        name: &str,
        entry: &ProviderBinary,
        target: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(name, entry, target) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    remove_if_exists(target);
                    if e.is_permanent() || attempt >= self.backoff.max_attempts {
                        return Err(e.into());
                    }
                    let delay = self.backoff.delay(attempt);
                    reporter.warn(&format!(
                        "download of '{name}' failed (attempt {attempt}): {e}; retrying"
                    ));
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// One download attempt, including archive extraction.
    fn fetch_once(
        &self,
        name: &str,
        entry: &ProviderBinary,
        target: &Path,
    ) -> Result<(), DownloadError> {
        let url = &entry.path;
        let response = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(status, _)) => {
                return Err(DownloadError::Http {
                    status,
                    url: url.clone(),
                });
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(DownloadError::Transport(t.to_string()));
            }
        };

        let total = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        let pb = progress::download_bar(&format!("downloading {name}"), total);

        let temp = temp_sibling(target);
        let result = match (archive_kind(url), &entry.archive_path) {
            (Some(kind), Some(member)) => {
                write_stream(pb.wrap_read(response.into_reader()), &temp)
                    .and_then(|()| extract_member(kind, &temp, member, target, url))
            }
            // Whole file, archive or not: stream straight to the target.
            _ => write_stream(pb.wrap_read(response.into_reader()), &temp).and_then(|()| {
                std::fs::rename(&temp, target)
                    .map_err(|e| DownloadError::Transport(format!("finalizing download: {e}")))
            }),
        };
        pb.finish_and_clear();
        remove_if_exists(&temp);
        result
    }
}

/// Select the entry matching the running platform.
fn platform_entry<'a>(
    name: &str,
    entries: &'a [ProviderBinary],
) -> Result<&'a ProviderBinary, DownloadError> {
    let (os, arch) = current_platform();
    entries
        .iter()
        .find(|e| e.os == os && e.arch == arch)
        .ok_or_else(|| DownloadError::NoPlatformMatch {
            name: name.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

/// Copy a local source into place, skipping when the destination already
/// matches by size and is at least as new as the source.
fn copy_local(source: &Path, target: &Path, name: &str) -> Result<()> {
    let src_meta = source.metadata().map_err(|_| DownloadError::MissingLocal {
        name: name.to_string(),
        path: source.display().to_string(),
    })?;
    if let Ok(dst_meta) = target.metadata() {
        let same_size = dst_meta.len() == src_meta.len();
        let up_to_date = match (src_meta.modified(), dst_meta.modified()) {
            (Ok(src), Ok(dst)) => src <= dst,
            _ => false,
        };
        if same_size && up_to_date {
            return Ok(());
        }
    }
    std::fs::copy(source, target)
        .with_context(|| format!("copying {} to {}", source.display(), target.display()))?;
    Ok(())
}

fn write_stream(mut reader: impl Read, dest: &Path) -> Result<(), DownloadError> {
    let map = |e: std::io::Error| DownloadError::Transport(format!("writing download: {e}"));
    let mut file = std::fs::File::create(dest).map_err(map)?;
    std::io::copy(&mut reader, &mut file)
        .map_err(|e| DownloadError::Transport(format!("download interrupted: {e}")))?;
    Ok(())
}

/// Extract one member from a downloaded archive into `target`.
fn extract_member(
    kind: ArchiveKind,
    archive: &Path,
    member: &str,
    target: &Path,
    url: &str,
) -> Result<(), DownloadError> {
    let missing = || DownloadError::MissingArchiveMember {
        archive: url.to_string(),
        member: member.to_string(),
    };
    let map = |e: std::io::Error| DownloadError::Transport(format!("extracting archive: {e}"));
    let wanted = member.trim_start_matches("./");

    let file = std::fs::File::open(archive).map_err(map)?;
    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| DownloadError::Transport(format!("reading zip: {e}")))?;
            let mut entry = zip.by_name(wanted).map_err(|_| missing())?;
            let mut out = std::fs::File::create(target).map_err(map)?;
            std::io::copy(&mut entry, &mut out).map_err(map)?;
            Ok(())
        }
        ArchiveKind::Tar | ArchiveKind::TarGz => {
            let reader: Box<dyn Read> = match kind {
                ArchiveKind::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
                _ => Box::new(file),
            };
            let mut tar = tar::Archive::new(reader);
            for entry in tar.entries().map_err(map)? {
                let mut entry = entry.map_err(map)?;
                let path = entry.path().map_err(map)?;
                if path.to_string_lossy().trim_start_matches("./") == wanted {
                    let mut out = std::fs::File::create(target).map_err(map)?;
                    std::io::copy(&mut entry, &mut out).map_err(map)?;
                    return Ok(());
                }
            }
            Err(missing())
        }
    }
}

/// Verify the declared checksum; on mismatch delete the artifact and fail.
fn verify_or_delete(target: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(target)?;
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    remove_if_exists(target);
    Err(DownloadError::ChecksumMismatch {
        path: target.display().to_string(),
        expected: expected.to_string(),
        actual,
    }
    .into())
}

fn checksum_matches(path: &Path, expected: &str) -> Result<bool> {
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected))
}

/// Copy preserving the executable bit, creating parent directories.
fn install_copy(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::copy(from, to)
        .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    set_executable(to)
}

fn remove_if_exists(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Sibling path a download streams into before the final rename.
fn temp_sibling(target: &Path) -> PathBuf {
    target.with_extension("partial")
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("setting executable bit on {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Compute the SHA-256 of a file as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
