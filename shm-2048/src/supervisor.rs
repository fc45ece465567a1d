use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::{Child, Command, Stdio},
};

use env_2048::EnvId;
use tracing::{debug, info, warn};

/// Worker processes, one per channel slot, started as `<program> worker --id <i> --channel <name>`
/// followed by any extra arguments.
#[derive(Debug)]
pub struct WorkerPool {
    program: PathBuf,
    channel: String,
    extra_args: Vec<OsString>,
    children: Vec<Option<Child>>,
}

impl WorkerPool {
    pub fn new(program: impl Into<PathBuf>, channel: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            channel: channel.into(),
            extra_args: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Starts workers `0..count`.
    pub fn spawn(&mut self, count: usize) -> io::Result<()> {
        self.children = (0..count)
            .map(|index| self.spawn_one(index as EnvId).map(Some))
            .collect::<io::Result<_>>()?;

        info!(count, program = %self.program.display(), "spawned workers");

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Restarts every worker that has exited. Returns how many were restarted.
    pub fn restart_dead(&mut self) -> io::Result<usize> {
        let mut restarted = 0;

        for index in 0..self.children.len() {
            let Some(child) = &mut self.children[index] else {
                continue;
            };

            if let Some(status) = child.try_wait()? {
                warn!(id = index, %status, "worker exited, restarting");
                self.children[index] = Some(self.spawn_one(index as EnvId)?);
                restarted += 1;
            }
        }

        Ok(restarted)
    }

    /// Sends SIGTERM to every worker and waits for them to exit.
    pub fn kill_all(&mut self) {
        for child in self.children.iter().flatten() {
            // SAFETY: plain signal delivery to a child we have not reaped yet.
            if unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) } != 0 {
                debug!(pid = child.id(), err = %io::Error::last_os_error(), "kill failed");
            }
        }

        for (index, child) in self.children.iter_mut().enumerate() {
            if let Some(mut child) = child.take() {
                match child.wait() {
                    Ok(status) => debug!(id = index, %status, "worker reaped"),
                    Err(err) => warn!(id = index, %err, "failed to reap worker"),
                }
            }
        }
    }

    fn spawn_one(&self, id: EnvId) -> io::Result<Child> {
        let child = Command::new(&self.program)
            .arg("worker")
            .arg("--id")
            .arg(id.to_string())
            .arg("--channel")
            .arg(&self.channel)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .spawn()?;

        debug!(id, pid = child.id(), "spawned worker");

        Ok(child)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.kill_all();
    }
}
