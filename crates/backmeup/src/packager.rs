use crate::command::{Secret, ShellCommand, sh_quote, template};
use crate::error::Result;
use crate::producer::{RawArtifact, RunLayout};
use crate::session::RemoteShell;

pub fn prepare_workdir(shell: &mut dyn RemoteShell, layout: &RunLayout) -> Result<()> {
    let cmd = ShellCommand::new(format!("mkdir -p {}", sh_quote(&layout.workdir)));
    shell.exec(&cmd)?;
    Ok(())
}

pub fn pack_commands(
    layout: &RunLayout,
    raw: &RawArtifact,
    elevation: Option<&Secret>,
) -> Vec<ShellCommand> {
    let mut cmds = Vec::with_capacity(3);
    if elevation.is_some() {
        // Elevated producers may leave a file the session user cannot read.
        let chmod = ShellCommand::new(format!("chmod 666 {}", sh_quote(&raw.remote_path)));
        cmds.push(template(chmod, elevation));
    }
    cmds.push(ShellCommand::new(format!(
        "cd {} && tar -zcf {} {}",
        sh_quote(&layout.workdir),
        sh_quote(&raw.packaged_name),
        sh_quote(&raw.file_name)
    )));
    cmds.push(ShellCommand::new(format!(
        "rm -f {}",
        sh_quote(&raw.remote_path)
    )));
    cmds
}

/// Archive the raw artifact next to itself and drop the intermediate.
/// Returns the packaged file's remote path.
pub fn pack(
    shell: &mut dyn RemoteShell,
    layout: &RunLayout,
    raw: &RawArtifact,
    elevation: Option<&Secret>,
) -> Result<String> {
    for cmd in pack_commands(layout, raw, elevation) {
        shell.exec(&cmd).map_err(|e| e.context("packaging"))?;
    }
    Ok(layout.remote_path(&raw.packaged_name))
}
