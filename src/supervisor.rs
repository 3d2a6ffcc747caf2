//! supervisord program definitions
//!
//! One `[program:...]` block per account. The bridge command listens on the
//! account's TCP port, feeds whatever arrives into signal-cli's stdin and
//! sends signal-cli's JSON output back through the fifo:
//!
//! ```text
//! nc -l -p 6000 </tmp/sigsocket0 | signal-cli --output=json -u +1555... --config ... jsonRpc >/tmp/sigsocket0
//! ```
//!
//! Rendering is pure; [`emit`] is the only part that touches the backend.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::backend::ProvisioningBackend;
use crate::error::{ProvisionError, Result};

const AUTOSTART: bool = true;
const AUTORESTART: bool = true;
const START_RETRIES: u32 = 10;
const WORKING_DIRECTORY: &str = "/usr/bin/";
const LOGFILE_MAX_BYTES: &str = "50MB";
const LOGFILE_BACKUPS: u32 = 10;
const NUM_PROCS: u32 = 1;

const UNIT_FILE_MODE: u32 = 0o644;

/// Everything that varies between two program definitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub program_name: String,
    pub identity: String,
    pub tcp_port: u16,
    pub fifo_path: PathBuf,
    /// signal-cli `--config` directory, trailing slash included
    pub config_dir: String,
    pub log_dir: PathBuf,
    pub cli_bin: String,
    pub run_user: String,
    pub java_home: String,
}

impl UnitSpec {
    pub fn file_name(&self) -> String {
        format!("{}.conf", self.program_name)
    }

    /// Every substituted value must stay on its own INI line
    pub fn check(&self) -> Result<()> {
        let fifo = self.fifo_path.to_string_lossy();
        let log_dir = self.log_dir.to_string_lossy();
        let values = [
            ("identity", self.identity.as_str()),
            ("fifo path", fifo.as_ref()),
            ("config dir", self.config_dir.as_str()),
            ("log dir", log_dir.as_ref()),
            ("cli binary", self.cli_bin.as_str()),
            ("run user", self.run_user.as_str()),
            ("JAVA_HOME", self.java_home.as_str()),
        ];
        for (field, value) in values {
            if value.chars().any(char::is_control) {
                return Err(ProvisionError::InvalidUnit {
                    program: self.program_name.clone(),
                    reason: format!("{} {:?} contains control characters", field, value),
                });
            }
        }
        Ok(())
    }

    /// The shell pipeline supervisord hands to `bash -c`
    pub fn bridge_command(&self) -> String {
        let fifo = shell_word(&self.fifo_path.to_string_lossy());
        format!(
            "nc -l -p {port} <{fifo} | {cli} --output=json -u {identity} --config {config} jsonRpc >{fifo}",
            port = self.tcp_port,
            fifo = fifo,
            cli = shell_word(&self.cli_bin),
            identity = shell_word(&self.identity),
            config = shell_word(&self.config_dir),
        )
    }
}

/// Quote `word` for bash only when it needs it
fn shell_word(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+-_.@/:=,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Escape a string for the inside of a double-quoted supervisord value.
/// supervisord splits `command` with shlex and runs `%(...)s` expansion on it.
fn supervisord_quoted(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('%', "%%")
}

/// Render the program block for `unit`
pub fn render(unit: &UnitSpec) -> String {
    format!(
        "\
[program:{name}]
environment=JAVA_HOME={java_home}
process_name={name}
command=bash -c \"{command}\"
autostart={autostart}
autorestart={autorestart}
startretries={start_retries}
user={user}
directory={directory}
redirect_stderr=true
stdout_logfile={log_dir}/out.log
stderr_logfile={log_dir}/err.log
stdout_logfile_maxbytes={max_bytes}
stdout_logfile_backups={backups}
numprocs={num_procs}
",
        name = unit.program_name,
        java_home = unit.java_home,
        command = supervisord_quoted(&unit.bridge_command()),
        autostart = AUTOSTART,
        autorestart = AUTORESTART,
        start_retries = START_RETRIES,
        user = unit.run_user,
        directory = WORKING_DIRECTORY,
        log_dir = unit.log_dir.display(),
        max_bytes = LOGFILE_MAX_BYTES,
        backups = LOGFILE_BACKUPS,
        num_procs = NUM_PROCS,
    )
}

/// Write the rendered unit to `<conf_dir>/<program>.conf`, replacing any
/// previous definition. Units that fail [`UnitSpec::check`] are never written.
pub fn emit(backend: &dyn ProvisioningBackend, conf_dir: &Path, unit: &UnitSpec) -> Result<PathBuf> {
    unit.check()?;
    let path = conf_dir.join(unit.file_name());
    backend
        .write_file(&path, render(unit).as_bytes(), UNIT_FILE_MODE)
        .map_err(|source| ProvisionError::WriteUnit {
            path: path.clone(),
            source,
        })?;
    debug!(program = %unit.program_name, path = %path.display(), "Wrote supervisor config");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailOn, MemoryBackend};

    fn unit() -> UnitSpec {
        UnitSpec {
            program_name: "signal-cli-json-rpc-0".to_string(),
            identity: "+15551234567".to_string(),
            tcp_port: 6000,
            fifo_path: PathBuf::from("/tmp/sigsocket0"),
            config_dir: "/home/.local/share/signal-cli/".to_string(),
            log_dir: PathBuf::from("/var/log/signal-cli-json-rpc-0"),
            cli_bin: "signal-cli".to_string(),
            run_user: "signal-api".to_string(),
            java_home: "/opt/java/openjdk".to_string(),
        }
    }

    #[test]
    fn test_render_golden() {
        let expected = "\
[program:signal-cli-json-rpc-0]
environment=JAVA_HOME=/opt/java/openjdk
process_name=signal-cli-json-rpc-0
command=bash -c \"nc -l -p 6000 </tmp/sigsocket0 | signal-cli --output=json -u +15551234567 --config /home/.local/share/signal-cli/ jsonRpc >/tmp/sigsocket0\"
autostart=true
autorestart=true
startretries=10
user=signal-api
directory=/usr/bin/
redirect_stderr=true
stdout_logfile=/var/log/signal-cli-json-rpc-0/out.log
stderr_logfile=/var/log/signal-cli-json-rpc-0/err.log
stdout_logfile_maxbytes=50MB
stdout_logfile_backups=10
numprocs=1
";
        assert_eq!(render(&unit()), expected);
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(&unit()), render(&unit()));
    }

    #[test]
    fn test_unusual_identity_is_quoted() {
        let mut unit = unit();
        unit.identity = "bob's phone".to_string();
        assert!(unit.bridge_command().contains(r"-u 'bob'\''s phone' --config"));

        unit.identity = "50%off".to_string();
        assert!(unit.bridge_command().contains("-u '50%off'"));
        assert!(render(&unit).contains("-u '50%%off'"));
    }

    #[test]
    fn test_double_quote_in_identity_is_escaped_for_supervisord() {
        let mut unit = unit();
        unit.identity = r#"a"b"#.to_string();

        let rendered = render(&unit);
        let command = rendered
            .lines()
            .find(|line| line.starts_with("command="))
            .unwrap();
        assert!(command.contains(r#"-u 'a\"b' --config"#));
        // The only unescaped quotes are the ones around the bash script
        let bare_quotes = command
            .char_indices()
            .filter(|&(i, c)| c == '"' && !command[..i].ends_with('\\'))
            .count();
        assert_eq!(bare_quotes, 2);
        assert!(command.ends_with(r#"jsonRpc >/tmp/sigsocket0""#));
    }

    #[test]
    fn test_backslash_in_identity_is_escaped_for_supervisord() {
        let mut unit = unit();
        unit.identity = r"dom\user".to_string();
        assert!(render(&unit).contains(r"-u 'dom\\user' --config"));
    }

    #[test]
    fn test_control_characters_are_refused() {
        let backend = MemoryBackend::new();
        let mut unit = unit();
        unit.identity = "bob\nuser=root".to_string();

        let err = emit(&backend, Path::new("/etc/supervisor/conf.d"), &unit).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidUnit { .. }));
        assert!(backend.files().is_empty());

        let mut unit = self::unit();
        unit.java_home = "/opt/java\r".to_string();
        assert!(unit.check().is_err());
        assert!(self::unit().check().is_ok());
    }

    #[test]
    fn test_emit_writes_conf_file() {
        let backend = MemoryBackend::new();
        let path = emit(&backend, Path::new("/etc/supervisor/conf.d"), &unit()).unwrap();

        assert_eq!(
            path,
            PathBuf::from("/etc/supervisor/conf.d/signal-cli-json-rpc-0.conf")
        );
        assert_eq!(backend.read_to_string(&path).unwrap(), render(&unit()));
    }

    #[test]
    fn test_emit_failure_is_fatal() {
        let backend = MemoryBackend::new();
        backend.fail(FailOn::WriteFile, "/etc/supervisor/conf.d/signal-cli-json-rpc-0.conf");

        let err = emit(&backend, Path::new("/etc/supervisor/conf.d"), &unit()).unwrap_err();
        assert!(matches!(err, ProvisionError::WriteUnit { .. }));
        assert!(err.to_string().contains("signal-cli-json-rpc-0.conf"));
    }
}
