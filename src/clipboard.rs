use anyhow::{Result, anyhow};
use copypasta::{ClipboardContext, ClipboardProvider};

/// Скопировать код в буфер обмена.
///
/// На Linux сначала пробуем wl-copy / xclip: copypasta теряет содержимое,
/// как только процесс завершается, а утилиты держат его сами.
pub fn copy_to_clipboard(value: &str) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let helpers: [(&str, &[&str], &str); 2] = [
            ("wl-copy", &[], "WAYLAND_DISPLAY"),
            ("xclip", &["-selection", "clipboard"], "DISPLAY"),
        ];
        for (cmd, args, display_var) in helpers {
            if std::env::var_os(display_var).is_none() {
                continue;
            }
            match pipe_to(cmd, args, value) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!(helper = cmd, error = %e, "clipboard helper failed"),
            }
        }
    }

    let mut ctx = ClipboardContext::new().map_err(|e| {
        anyhow!("Failed to initialize clipboard: {e}. Print the code instead: otpvault code <id> <index>")
    })?;
    ctx.set_contents(value.to_string())
        .map_err(|e| anyhow!("Failed to copy to clipboard: {e}"))?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pipe_to(cmd: &str, args: &[&str], value: &str) -> Result<()> {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("failed to spawn {cmd}: {e}"))?;

    // stdin закрывается в конце match, до wait: иначе процесс ждёт EOF вечно.
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(value.as_bytes()),
        None => Ok(()),
    };

    // wait и при ошибке записи.
    let status = child.wait()?;
    written.map_err(|e| anyhow!("failed to write to {cmd}: {e}"))?;
    if !status.success() {
        return Err(anyhow!("{cmd} exited with status {status}"));
    }
    Ok(())
}
