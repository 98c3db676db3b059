use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::from_env(env::args().skip(1))?;
    generate_fixtures(&args.output, &args.issuer, &args.client_id)
}

#[derive(Debug)]
struct Args {
    output: PathBuf,
    issuer: String,
    client_id: String,
}

impl Args {
    fn from_env(mut args: impl Iterator<Item = String>) -> Result<Self, Box<dyn Error>> {
        let mut output = PathBuf::from("fixtures");
        let mut issuer = String::from("https://idp.example.test/");
        let mut client_id = String::from("client-123");

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--output" => {
                    output = PathBuf::from(args.next().ok_or("--output requires a path argument")?)
                }
                "--issuer" => {
                    issuer = args.next().ok_or("--issuer requires a value")?;
                }
                "--client-id" => {
                    client_id = args.next().ok_or("--client-id requires a value")?;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("unexpected argument: {arg}\nUse --help for usage.").into());
                }
            }
        }

        Ok(Self {
            output,
            issuer,
            client_id,
        })
    }
}

fn print_help() {
    eprintln!(
        "Usage: cargo run -p gen-test-fixtures -- [--output DIR] [--issuer URL] [--client-id ID]"
    );
}

fn generate_fixtures(
    output_dir: &Path,
    issuer: &str,
    client_id: &str,
) -> Result<(), Box<dyn Error>> {
    let key_dir = output_dir.join("test-keys");
    let token_dir = output_dir.join("tokens");
    let state_dir = output_dir.join("states");
    fs::create_dir_all(&key_dir)?;
    fs::create_dir_all(&token_dir)?;
    fs::create_dir_all(&state_dir)?;

    let mut rng = OsRng;
    let good_private = RsaPrivateKey::new(&mut rng, 2048)?;
    let good_public = RsaPublicKey::from(&good_private);

    let wrong_private = RsaPrivateKey::new(&mut rng, 2048)?;

    let good_private_pem = good_private.to_pkcs8_pem(LineEnding::LF)?.to_string();
    let good_public_pem = good_public.to_public_key_pem(LineEnding::LF)?;
    let wrong_private_pem = wrong_private.to_pkcs8_pem(LineEnding::LF)?.to_string();

    fs::write(key_dir.join("rsa-private.pem"), &good_private_pem)?;
    fs::write(key_dir.join("rsa-public.pem"), &good_public_pem)?;
    fs::write(key_dir.join("wrong-key-private.pem"), &wrong_private_pem)?;

    let n = URL_SAFE_NO_PAD.encode(good_public.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(good_public.e().to_bytes_be());
    let jwks = json!({
        "keys": [
            {
                "kty": "RSA",
                "kid": "test-key",
                "use": "sig",
                "alg": "RS256",
                "n": n,
                "e": e,
            }
        ]
    });
    fs::write(key_dir.join("jwks.json"), serde_json::to_vec_pretty(&jwks)?)?;

    let now = now_secs();
    let valid_exp = 4_102_444_800_i64; // 2100-01-01
    let expired_exp = 946_684_800_i64; // 2000-01-01

    let valid_claims = json!({
        "sub": "1234567890",
        "email": "user@example.com",
        "name": "Test User",
        "iss": issuer,
        "aud": client_id,
        "iat": now,
        "exp": valid_exp,
    });

    let expired_claims = json!({
        "sub": "1234567890",
        "email": "user@example.com",
        "name": "Test User",
        "iss": issuer,
        "aud": client_id,
        "iat": now,
        "exp": expired_exp,
    });

    let wrong_aud_claims = json!({
        "sub": "1234567890",
        "email": "user@example.com",
        "name": "Test User",
        "iss": issuer,
        "aud": "wrong-client-id",
        "iat": now,
        "exp": valid_exp,
    });

    let wrong_iss_claims = json!({
        "sub": "1234567890",
        "email": "user@example.com",
        "name": "Test User",
        "iss": "https://wrong-issuer.example.test/",
        "aud": client_id,
        "iat": now,
        "exp": valid_exp,
    });

    let missing_claims = json!({
        "email": "user@example.com",
        "iat": now,
        "exp": valid_exp,
    });

    write_token(
        token_dir.join("valid.jwt"),
        &valid_claims,
        &good_private_pem,
        "test-key",
    )?;
    write_token(
        token_dir.join("expired.jwt"),
        &expired_claims,
        &good_private_pem,
        "test-key",
    )?;
    write_token(
        token_dir.join("wrong-audience.jwt"),
        &wrong_aud_claims,
        &good_private_pem,
        "test-key",
    )?;
    write_token(
        token_dir.join("wrong-issuer.jwt"),
        &wrong_iss_claims,
        &good_private_pem,
        "test-key",
    )?;
    write_token(
        token_dir.join("wrong-signature.jwt"),
        &valid_claims,
        &wrong_private_pem,
        "test-key",
    )?;
    write_token(
        token_dir.join("missing-claims.jwt"),
        &missing_claims,
        &good_private_pem,
        "test-key",
    )?;
    write_state_fixtures(&state_dir)?;

    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

fn write_token(
    path: PathBuf,
    claims: &serde_json::Value,
    private_key_pem: &str,
    kid: &str,
) -> Result<(), Box<dyn Error>> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
    let token = encode(&header, claims, &key)?;
    fs::write(path, token)?;
    Ok(())
}

/// Pre-encoded `state` parameters in the same base64url-JSON envelope the
/// service emits, for driving callback tests from the command line.
fn write_state_fixtures(state_dir: &Path) -> Result<(), Box<dyn Error>> {
    let valid = json!({
        "origin": {
            "protocol": "https",
            "host": "www.example.test",
            "path": "/protected/resource?x=1",
        },
        "nonce": "nonce-123",
    });
    let missing_nonce = json!({
        "origin": {
            "protocol": "https",
            "host": "www.example.test",
            "path": "/protected/resource?x=1",
        },
    });

    fs::write(
        state_dir.join("valid.state"),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&valid)?),
    )?;
    fs::write(
        state_dir.join("missing-nonce.state"),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&missing_nonce)?),
    )?;
    fs::write(state_dir.join("not-base64.state"), "!!!not-base64url!!!")?;
    fs::write(
        state_dir.join("not-json.state"),
        URL_SAFE_NO_PAD.encode(b"plain text, not a state payload"),
    )?;

    Ok(())
}
