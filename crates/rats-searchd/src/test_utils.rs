//! Test utilities for searchd supervision
//!
//! Provides a fake `searchd` shell script that follows the same command-line
//! contract as the real daemon, so the supervisor can be exercised end to end.

use std::path::{Path, PathBuf};

/// How the fake daemon behaves after launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeSearchd {
    /// Prints the readiness marker (twice) and serves until `--stopwait`
    Healthy,
    /// Prints the readiness marker, then exits with code 1
    CrashAfterReady,
    /// Exits with code 2 without ever printing the marker
    NeverReady,
    /// Runs forever without printing anything
    Silent,
    /// Echoes a Windows-1251 config path (not valid UTF-8) before the marker,
    /// then serves like `Healthy`
    LegacyEncodedPath,
}

impl FakeSearchd {
    fn body(self) -> &'static str {
        match self {
            FakeSearchd::Healthy => {
                r#"echo "Sphinx 2.2.11-id64-release (95ae9a6)"
echo "listening on all interfaces, port=9312"
echo "precaching index 'torrents'"
echo "accepting connections"
echo "accepting connections"
exec sleep 30"#
            }
            FakeSearchd::CrashAfterReady => {
                r#"echo "accepting connections"
sleep 0.2
exit 1"#
            }
            FakeSearchd::NeverReady => {
                r#"echo "FATAL: failed to open config" 1>&2
exit 2"#
            }
            FakeSearchd::Silent => "exec sleep 30",
            FakeSearchd::LegacyEncodedPath => {
                r#"printf 'using config file C:\\Users\\\310\342\340\355\\sphinx.conf\n'
echo "accepting connections"
echo "still writing after the marker"
exec sleep 30"#
            }
        }
    }
}

/// Write an executable fake searchd into `dir` and return its path.
///
/// The script understands `--config <path> --nodetach` (serve) and
/// `--config <path> --stopwait` (terminate the serving instance through the pid
/// file next to the config, like the real daemon does).
#[cfg(unix)]
pub fn fake_searchd(dir: &Path, behavior: FakeSearchd) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        r#"#!/bin/sh
conf_dir=$(dirname "$2")
if [ "$3" = "--stopwait" ]; then
    kill "$(cat "$conf_dir/searchd.pid")"
    exit 0
fi
echo $$ > "$conf_dir/searchd.pid"
{}
"#,
        behavior.body()
    );

    let path = dir.join("searchd");
    std::fs::write(&path, script).expect("write fake searchd");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake searchd");
    path
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_fake_searchd_is_executable() {
        let temp = tempfile::tempdir().unwrap();
        let path = fake_searchd(temp.path(), FakeSearchd::Healthy);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);

        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.contains("accepting connections"));
        assert!(script.contains("--stopwait"));
    }
}
