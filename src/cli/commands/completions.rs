//! `kdbxkit completions`: print a shell completion script on stdout.
//!
//! Database, output and key-file arguments carry a file-path hint, so the
//! generated scripts complete them from the filesystem.

use std::io::{self, Write};

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::Cli;
use crate::errors::Result;

pub fn execute(shell: Shell) -> Result<()> {
    write_script(shell, &mut io::stdout())
}

fn write_script(shell: Shell, out: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut *out);
    out.flush()?;
    Ok(())
}
