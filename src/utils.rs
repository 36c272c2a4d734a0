use crate::peer::types::IceServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Reconnect token the broker ties to our id
pub fn random_token() -> String {
    hex::encode(rand::rng().random::<[u8; 6]>())
}

// Adds the stun:/turn: scheme when the user left it out
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:") || config.url.starts_with("turns:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}

/// Escapes text before a web host renders it
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> IceServerConfig {
        IceServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_added_only_when_missing() {
        assert_eq!(add_ice_url_scheme(&server("stun", "stun.l.google.com:19302")), "stun:stun.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&server("turn", "relay.example:3478")), "turn:relay.example:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "turn:relay.example:3478")), "turn:relay.example:3478");
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html(r#"<b>"hi" & 'bye'</b>"#), "&lt;b&gt;&quot;hi&quot; &amp; &#39;bye&#39;&lt;/b&gt;");
    }

    #[test]
    fn ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_id(), id);
    }
}
