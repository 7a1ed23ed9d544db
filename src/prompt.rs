use anyhow::Result;
use std::io::{self, Write};
use zeroize::Zeroizing;

pub fn prompt_string(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim_end_matches(['\r', '\n']).to_string())
}

pub fn prompt_password_hidden(prompt: &str) -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(rpassword::prompt_password(prompt)?))
}

/// Новый пароль карты с подтверждением.
pub fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password_hidden(prompt)?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    let confirm = prompt_password_hidden("Confirm password: ")?;
    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}
