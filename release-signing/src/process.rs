// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! External process execution. */

use {
    crate::error::{Result, SigningError},
    log::{debug, info, Level},
    std::{
        io::{BufRead, BufReader},
        path::{Path, PathBuf},
    },
};

/// An external command to run.
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    log_level: Level,
}

impl ExternalCommand {
    /// Construct a command from its argv. The first element is the program.
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SigningError::Config("empty command line".into()))?;

        Ok(Self {
            program: program.as_ref().to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: None,
            log_level: Level::Info,
        })
    }

    /// Run the command in the given directory.
    pub fn dir(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Log process output at the given level.
    pub fn log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Run the command to completion, logging its output.
    ///
    /// A non-zero exit is an error.
    pub async fn run(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.run_blocking())
            .await
            .map_err(|e| SigningError::ExternalTool(format!("process task failed: {}", e)))?
    }

    fn run_blocking(&self) -> Result<()> {
        match &self.cwd {
            Some(cwd) => info!("running {:?} in {}", self.argv(), cwd.display()),
            None => info!("running {:?}", self.argv()),
        }

        let mut expression = duct::cmd(self.program.as_str(), &self.args)
            .stderr_to_stdout()
            .unchecked();
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd);
        }

        let reader = expression.reader().map_err(|e| {
            SigningError::ExternalTool(format!("unable to run {}: {}", self.program, e))
        })?;

        {
            let lines = BufReader::new(&reader);
            for line in lines.lines() {
                log::log!(self.log_level, "{}", line?);
            }
        }

        let output = reader.try_wait()?.ok_or_else(|| {
            SigningError::ExternalTool(format!("unable to wait on {}", self.program))
        })?;

        debug!("{} exited with {}", self.program, output.status);

        if output.status.success() {
            Ok(())
        } else {
            Err(SigningError::ExternalTool(format!(
                "{:?} exited with {}",
                self.argv(),
                output.status
            )))
        }
    }
}
