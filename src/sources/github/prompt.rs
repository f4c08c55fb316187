use async_trait::async_trait;
use std::io::{self, BufRead, Write};

/// Supplies a two-factor code when GitHub challenges the login.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn two_factor_code(&self) -> io::Result<String>;
}

/// Asks on the terminal until a non-empty code is entered.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl CredentialPrompt for StdinPrompt {
    async fn two_factor_code(&self) -> io::Result<String> {
        // Terminal reads block; keep them off the runtime workers.
        tokio::task::spawn_blocking(|| {
            let stdin = io::stdin();
            let mut stderr = io::stderr();
            read_code(&mut stdin.lock(), &mut stderr)
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// Always answers with the same code.
#[derive(Debug, Clone)]
pub struct StaticPrompt(pub String);

#[async_trait]
impl CredentialPrompt for StaticPrompt {
    async fn two_factor_code(&self) -> io::Result<String> {
        Ok(self.0.clone())
    }
}

fn read_code(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<String> {
    loop {
        // An accidental Enter just asks again.
        write!(output, "Enter 2FA code: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no two-factor code entered",
            ));
        }

        let code = line.trim();
        if !code.is_empty() {
            return Ok(code.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn blank_lines_are_asked_again() {
        let mut input = Cursor::new("\n  \n123456\n");
        let mut output = Vec::new();
        let code = read_code(&mut input, &mut output).unwrap();
        assert_eq!(code, "123456");
        assert_eq!(String::from_utf8(output).unwrap().matches("Enter 2FA code").count(), 3);
    }

    #[test]
    fn eof_is_an_error() {
        let mut input = Cursor::new("\n");
        let err = read_code(&mut input, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn static_prompt_is_deterministic() {
        let prompt = StaticPrompt("000111".into());
        assert_eq!(prompt.two_factor_code().await.unwrap(), "000111");
        assert_eq!(prompt.two_factor_code().await.unwrap(), "000111");
    }

    #[tokio::test]
    async fn prompt_works_behind_a_trait_object() {
        let prompt: &dyn CredentialPrompt = &StaticPrompt("424242".into());
        assert_eq!(prompt.two_factor_code().await.unwrap(), "424242");
    }
}
