//! Build a callback exactly as the provider would send it.

use crate::cli::args::{SignCliArgs, SignProvider};
use crate::config::Config;
use crate::crypto::{signature, LarkCipher, TencentCodec};
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde_json::json;
use std::io::Read;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCallback {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    /// JSON request body.
    pub body: String,
}

pub fn sign_tencent(
    token: &str,
    encoding_aes_key: &str,
    plaintext: &str,
    timestamp: &str,
    nonce: &str,
) -> Result<SignedCallback> {
    let codec = TencentCodec::from_encoding_key(encoding_aes_key)
        .context("Invalid Tencent encoding_aes_key")?;
    let data = codec.encrypt(plaintext);
    let signature = signature::compute_signature(token, timestamp, nonce, &data);

    Ok(SignedCallback {
        timestamp: timestamp.to_string(),
        nonce: nonce.to_string(),
        signature,
        body: json!({ "data": data }).to_string(),
    })
}

fn read_event(args: &SignCliArgs) -> Result<String> {
    match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            Ok(buf)
        }
    }
}

pub fn handle_sign_command(args: SignCliArgs) -> Result<()> {
    let config = Config::load()?;
    let plaintext = read_event(&args)?;
    serde_json::from_str::<serde_json::Value>(&plaintext).context("Event is not valid JSON")?;

    let base = format!("http://{}", config.server.bind);

    match args.provider {
        SignProvider::Tencent => {
            if !config.tencent.callbacks_enabled() {
                return Err(anyhow!(
                    "Tencent token and encoding_aes_key must be set in the config"
                ));
            }
            let timestamp = args
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp().to_string());
            let nonce = args
                .nonce
                .unwrap_or_else(|| rand::thread_rng().gen_range(1..=u32::MAX).to_string());

            let signed = sign_tencent(
                &config.tencent.token,
                &config.tencent.encoding_aes_key,
                &plaintext,
                &timestamp,
                &nonce,
            )?;

            println!("timestamp: {}", signed.timestamp);
            println!("nonce: {}", signed.nonce);
            println!("signature: {}", signed.signature);
            println!("body: {}", signed.body);
            println!(
                "\ncurl -X POST {}/webhooks/tencent -H 'timestamp: {}' -H 'nonce: {}' -H 'signature: {}' -d '{}'",
                base, signed.timestamp, signed.nonce, signed.signature, signed.body
            );
        }
        SignProvider::Lark => {
            if config.lark.encrypt_key.is_empty() {
                return Err(anyhow!("Lark encrypt_key must be set in the config"));
            }
            let body = json!({ "encrypt": LarkCipher::new(&config.lark.encrypt_key).encrypt(&plaintext) })
                .to_string();
            println!("body: {}", body);
            println!("\ncurl -X POST {}/webhooks/lark -d '{}'", base, body);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY";

    #[test]
    fn test_signed_callback_verifies_and_decrypts() {
        let event = r#"{"event":"meeting.started","payload":[]}"#;
        let signed = sign_tencent("token", KEY, event, "1700000000", "99").unwrap();

        let body: serde_json::Value = serde_json::from_str(&signed.body).unwrap();
        let data = body["data"].as_str().unwrap();
        assert!(signature::verify("token", "1700000000", "99", data, &signed.signature));
        assert_eq!(TencentCodec::from_encoding_key(KEY).unwrap().decrypt(data).unwrap(), event);
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(sign_tencent("token", "short", "{}", "1", "2").is_err());
    }
}
