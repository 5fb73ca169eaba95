use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Only this much of the user agent goes into the fingerprint
const USER_AGENT_PREFIX: usize = 50;

/// What the browser tells us about itself.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub screen_width: u32,
    #[serde(default)]
    pub screen_height: u32,
}

/// Derive the rate limiter key for a client.
///
/// This is a throttle key for the login form and nothing more. Anyone can
/// spoof every input, so it must never be used as an identity.
pub fn client_fingerprint(info: &ClientInfo) -> String {
    let user_agent: String = info.user_agent.chars().take(USER_AGENT_PREFIX).collect();
    let raw = format!(
        "{}|{}|{}|{}x{}",
        info.hostname, user_agent, info.language, info.screen_width, info.screen_height
    );

    let digest = Sha256::digest(raw.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

    format!("client_{}", to_base36(hash))
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> ClientInfo {
        ClientInfo {
            hostname: "app.plyaz.io".into(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)".into(),
            language: "en-GB".into(),
            screen_width: 1920,
            screen_height: 1080,
        }
    }

    #[test]
    fn same_client_same_key() {
        assert_eq!(client_fingerprint(&browser()), client_fingerprint(&browser()));
        assert!(client_fingerprint(&browser()).starts_with("client_"));
    }

    #[test]
    fn user_agent_tail_is_ignored() {
        let mut other = browser();
        other.user_agent.push_str(" Chrome/120.0.0.0 Safari/537.36");
        assert_eq!(client_fingerprint(&browser()), client_fingerprint(&other));
    }

    #[test]
    fn screen_size_changes_key() {
        let mut other = browser();
        other.screen_width = 1280;
        assert_ne!(client_fingerprint(&browser()), client_fingerprint(&other));
    }

    #[test]
    fn base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }
}
