//! Best-effort identification of the code revision and machine a run used.
//!
//! Nothing here fails a run: anything that can't be determined is `None`.

use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::schema::HostInfo;

const EC2_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data";
const EC2_TIMEOUT: Duration = Duration::from_millis(300);

/// Current UTC time, RFC 3339.
pub fn now_utc_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8(output.stdout).ok()?;
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Commit SHA: `GIT_SHA`/`GITHUB_SHA` if set (CI), else `git rev-parse HEAD`.
pub fn git_sha() -> Option<String> {
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .filter(|s| !s.is_empty())
        .or_else(|| command_stdout("git", &["rev-parse", "HEAD"]))
}

/// Whether the work tree differs from HEAD; `None` outside a git checkout.
pub fn git_dirty() -> Option<bool> {
    let status = Command::new("git")
        .args(["diff", "--quiet", "HEAD"])
        .status()
        .ok()?;
    match status.code() {
        Some(0) => Some(false),
        Some(1) => Some(true),
        _ => None,
    }
}

pub fn user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|s| !s.is_empty())
}

pub fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| command_stdout("hostname", &[]))
}

fn ec2_metadata(agent: &ureq::Agent, key: &str) -> Option<String> {
    let url = format!("{EC2_METADATA_URL}/{key}");
    match agent.get(&url).call() {
        Ok(resp) => resp.into_string().ok().map(|s| s.trim().to_string()),
        Err(e) => {
            debug!(%url, error = %e, "ec2 metadata unavailable");
            None
        }
    }
}

/// EC2 instance id and type, if running on EC2.
pub fn ec2_instance() -> (Option<String>, Option<String>) {
    let agent = ureq::AgentBuilder::new().timeout(EC2_TIMEOUT).build();
    let id = ec2_metadata(&agent, "instance-id");
    // Skip the second request when the first already timed out.
    let ty = id
        .as_ref()
        .and_then(|_| ec2_metadata(&agent, "instance-type"));
    (id, ty)
}

impl HostInfo {
    /// Gather everything; `probe_ec2 = false` skips the metadata endpoint.
    pub fn capture(probe_ec2: bool) -> Self {
        let (instance_id, instance_type) = if probe_ec2 {
            ec2_instance()
        } else {
            (None, None)
        };
        let sha = git_sha();
        let dirty = sha.as_ref().and_then(|_| git_dirty());
        let info = HostInfo {
            sha,
            dirty,
            user: user(),
            hostname: hostname(),
            instance_id,
            instance_type,
        };
        debug!(?info, "captured host info");
        info
    }

    /// `<sha>` or `<sha>-dirty`, as shown in reports.
    pub fn revision(&self) -> Option<String> {
        self.sha.as_ref().map(|sha| match self.dirty {
            Some(true) => format!("{sha}-dirty"),
            _ => sha.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_marks_dirty() {
        let mut info = HostInfo {
            sha: Some("0123abcd".to_string()),
            dirty: Some(true),
            ..Default::default()
        };
        assert_eq!(info.revision().as_deref(), Some("0123abcd-dirty"));
        info.dirty = Some(false);
        assert_eq!(info.revision().as_deref(), Some("0123abcd"));
        info.sha = None;
        assert_eq!(info.revision(), None);
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let ts = now_utc_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "{ts}");
        assert!(ts.ends_with('Z'));
    }
}
