use std::fs;
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, instrument, warn};

use crate::encoder::{EncoderArgs, EncoderControl, EncoderInput, EncoderLauncher};
use crate::StreamError;

/// Running encoder process
pub struct EncoderProcess {
    child: Child,
    status: Option<ExitStatus>,
}

impl EncoderProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }
}

impl EncoderControl for EncoderProcess {
    fn stop(&mut self, graceful: bool) -> Result<(), StreamError> {
        if self.has_exited()? {
            return Ok(());
        }

        if graceful {
            debug!(pid = self.id(), "Sending SIGINT to encoder");
            kill(Pid::from_raw(self.id() as i32), Signal::SIGINT)
                .map_err(|e| StreamError::EncoderSignal(e.to_string()))
        } else {
            debug!(pid = self.id(), "Killing encoder");
            self.child.kill().map_err(StreamError::Io)
        }
    }

    fn has_exited(&mut self) -> Result<bool, StreamError> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
            if let Some(status) = self.status {
                info!(pid = self.id(), %status, "Encoder exited");
            }
        }
        Ok(self.status.is_some())
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if matches!(self.has_exited(), Ok(false)) {
            warn!(pid = self.id(), "Encoder still running on drop, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawns the encoder with a piped stdin
#[derive(Debug, Default, Clone)]
pub struct FfmpegLauncher;

impl EncoderLauncher for FfmpegLauncher {
    type Process = EncoderProcess;

    #[instrument(skip_all, fields(program = %args.program, output = %args.output_path.display()))]
    fn launch(&self, args: &EncoderArgs) -> Result<(EncoderProcess, EncoderInput), StreamError> {
        if let Some(dir) = args.output_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut child = Command::new(&args.program)
            .args(&args.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| StreamError::EncoderSpawn {
                program: args.program.clone(),
                source,
            })?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(StreamError::EncoderSpawn {
                    program: args.program.clone(),
                    source: std::io::Error::other("stdin was not captured"),
                });
            }
        };

        info!(pid = child.id(), "Encoder started");
        Ok((
            EncoderProcess {
                child,
                status: None,
            },
            Box::new(stdin),
        ))
    }
}
