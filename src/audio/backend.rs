//! External operations on the audio graph
//!
//! Every graph edit and graph dump goes through [`GraphBackend`]. The
//! production implementation shells out to the PipeWire command line tools;
//! tests substitute a recording fake.

use std::process::{Command, Output};

use thiserror::Error;
use tracing::debug;

use super::graph::PortGraphSnapshot;
use super::types::PortId;

/// Failure of one external command
#[derive(Error, Debug)]
pub enum BackendError {
    /// The executable could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and reported failure
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The command succeeded but printed something we cannot use
    #[error("unexpected output from {program}: {message}")]
    Output { program: String, message: String },
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Identifier of a virtual device created by [`GraphBackend::load_virtual_sink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The audio server's external operations
///
/// Calls block until the operation finished; callers run them off the
/// router thread.
pub trait GraphBackend: Send + Sync {
    /// Snapshot the node/port graph
    fn dump_graph(&self) -> BackendResult<PortGraphSnapshot>;

    /// Connect one output port to one input port
    fn link(&self, output: PortId, input: PortId) -> BackendResult<()>;

    /// Disconnect one output port from one input port
    fn unlink(&self, output: PortId, input: PortId) -> BackendResult<()>;

    /// Create the virtual microphone, returning its module id
    fn load_virtual_sink(&self, name: &str, description: &str) -> BackendResult<ModuleId>;

    /// Remove a device created by [`GraphBackend::load_virtual_sink`]
    fn unload_virtual_sink(&self, module: ModuleId) -> BackendResult<()>;
}

/// Executable names for [`CommandBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub pw_dump: String,
    pub pw_link: String,
    pub pactl: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            pw_dump: "pw-dump".to_string(),
            pw_link: "pw-link".to_string(),
            pactl: "pactl".to_string(),
        }
    }
}

/// [`GraphBackend`] built on `pw-dump`, `pw-link` and `pactl`
#[derive(Debug, Clone, Default)]
pub struct CommandBackend {
    commands: CommandSet,
}

impl CommandBackend {
    pub fn new(commands: CommandSet) -> Self {
        Self { commands }
    }

    fn run(&self, program: &str, args: &[String]) -> BackendResult<Output> {
        debug!(program, ?args, "running external command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| BackendError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

impl GraphBackend for CommandBackend {
    fn dump_graph(&self) -> BackendResult<PortGraphSnapshot> {
        let output = self.run(&self.commands.pw_dump, &[])?;
        PortGraphSnapshot::parse(&String::from_utf8_lossy(&output.stdout)).map_err(|e| {
            BackendError::Output {
                program: self.commands.pw_dump.clone(),
                message: e.to_string(),
            }
        })
    }

    fn link(&self, output: PortId, input: PortId) -> BackendResult<()> {
        self.run(
            &self.commands.pw_link,
            &[output.0.to_string(), input.0.to_string()],
        )?;
        Ok(())
    }

    fn unlink(&self, output: PortId, input: PortId) -> BackendResult<()> {
        self.run(
            &self.commands.pw_link,
            &["-d".to_string(), output.0.to_string(), input.0.to_string()],
        )?;
        Ok(())
    }

    fn load_virtual_sink(&self, name: &str, description: &str) -> BackendResult<ModuleId> {
        let args = virtual_sink_args(name, description);
        let output = self.run(&self.commands.pactl, &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        parse_module_id(&stdout).ok_or_else(|| BackendError::Output {
            program: self.commands.pactl.clone(),
            message: format!("no module id in {:?}", stdout.trim()),
        })
    }

    fn unload_virtual_sink(&self, module: ModuleId) -> BackendResult<()> {
        self.run(
            &self.commands.pactl,
            &["unload-module".to_string(), module.to_string()],
        )?;
        Ok(())
    }
}

/// Arguments for `pactl` creating a stereo null sink that presents as a source
pub fn virtual_sink_args(name: &str, description: &str) -> Vec<String> {
    vec![
        "load-module".to_string(),
        "module-null-sink".to_string(),
        "media.class=Audio/Source/Virtual".to_string(),
        format!("sink_name={}", name),
        "channel_map=front-left,front-right".to_string(),
        format!(
            "sink_properties=device.description=\"{}\"",
            description.replace(' ', "\\ ")
        ),
    ]
}

/// `pactl load-module` prints the new module index on its own line
pub fn parse_module_id(stdout: &str) -> Option<ModuleId> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .map(ModuleId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_id_from_pactl_output() {
        assert_eq!(parse_module_id("536870913\n"), Some(ModuleId(536870913)));
        assert_eq!(parse_module_id("\n  42  \n"), Some(ModuleId(42)));
        assert_eq!(parse_module_id("Failure: Module initialization failed"), None);
        assert_eq!(parse_module_id(""), None);
    }

    #[test]
    fn sink_args_name_the_device_and_escape_spaces() {
        let args = virtual_sink_args("VirtualMic", "Virtual Microphone");
        assert!(args.contains(&"sink_name=VirtualMic".to_string()));
        assert!(args.contains(&"media.class=Audio/Source/Virtual".to_string()));
        assert!(args.contains(&"sink_properties=device.description=\"Virtual\\ Microphone\"".to_string()));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let backend = CommandBackend::new(CommandSet {
            pw_dump: "virtmic-test-no-such-binary".to_string(),
            ..CommandSet::default()
        });

        match backend.dump_graph() {
            Err(BackendError::Spawn { program, .. }) => {
                assert_eq!(program, "virtmic-test-no-such-binary")
            }
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
