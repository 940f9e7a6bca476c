//! Deterministic launchd plist emission.
//!
//! The ensure engine decides whether to reload by comparing plist bytes, so
//! the rendering here must be a pure function of its inputs: fixed key
//! order, sorted environment dict, stable indentation. Change detection
//! breaks the moment two renders of the same definition differ by a byte.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Name of the single socket entry in the `Sockets` dict. The wrapper asks
/// launchd for its inherited descriptor under this key.
pub const SOCKET_KEY: &str = "mcpli";

/// Octal 0600; launchd applies this mode to the socket it creates.
const SOCK_PATH_MODE: u32 = 384;

/// A launchd service definition for one daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Service label (`com.mcpli.<cwdHash>.<id>`).
    pub label: String,
    /// Absolute program path plus arguments (`mcpli daemon run`).
    pub program_arguments: Vec<String>,
    /// Working directory the daemon serves.
    pub working_directory: PathBuf,
    /// Environment dict; sorted iteration keeps bytes stable.
    pub env: BTreeMap<String, String>,
    /// Path launchd binds the listening socket to.
    pub socket_path: PathBuf,
}

impl ServiceDefinition {
    /// Render the definition as plist XML.
    ///
    /// Byte-stable: equal definitions render to equal bytes.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(
            "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
             \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
        );
        out.push_str("<plist version=\"1.0\">\n<dict>\n");

        let _ = writeln!(out, "\t<key>Label</key>");
        let _ = writeln!(out, "\t<string>{}</string>", xml_escape(&self.label));

        out.push_str("\t<key>ProgramArguments</key>\n\t<array>\n");
        for arg in &self.program_arguments {
            let _ = writeln!(out, "\t\t<string>{}</string>", xml_escape(arg));
        }
        out.push_str("\t</array>\n");

        let _ = writeln!(out, "\t<key>WorkingDirectory</key>");
        let _ = writeln!(
            out,
            "\t<string>{}</string>",
            xml_escape(&self.working_directory.display().to_string())
        );

        out.push_str("\t<key>EnvironmentVariables</key>\n\t<dict>\n");
        for (key, value) in &self.env {
            let _ = writeln!(out, "\t\t<key>{}</key>", xml_escape(key));
            let _ = writeln!(out, "\t\t<string>{}</string>", xml_escape(value));
        }
        out.push_str("\t</dict>\n");

        out.push_str("\t<key>Sockets</key>\n\t<dict>\n");
        let _ = writeln!(out, "\t\t<key>{}</key>", xml_escape(SOCKET_KEY));
        out.push_str("\t\t<dict>\n");
        let _ = writeln!(out, "\t\t\t<key>SockPathName</key>");
        let _ = writeln!(
            out,
            "\t\t\t<string>{}</string>",
            xml_escape(&self.socket_path.display().to_string())
        );
        let _ = writeln!(out, "\t\t\t<key>SockPathMode</key>");
        let _ = writeln!(out, "\t\t\t<integer>{SOCK_PATH_MODE}</integer>");
        out.push_str("\t\t</dict>\n\t</dict>\n");

        // A clean exit must not respawn the daemon; the next client
        // connection activates it instead.
        out.push_str("\t<key>KeepAlive</key>\n\t<dict>\n");
        out.push_str("\t\t<key>SuccessfulExit</key>\n\t\t<false/>\n");
        out.push_str("\t</dict>\n");

        out.push_str("\t<key>ProcessType</key>\n\t<string>Background</string>\n");

        out.push_str("</dict>\n</plist>\n");
        out
    }

    /// Read one environment value back out of rendered plist text.
    ///
    /// Only used on files this builder wrote, so a targeted scan of the
    /// `EnvironmentVariables` dict is sufficient; it is how the ensure
    /// engine preserves a prior daemon timeout across unrelated changes.
    #[must_use]
    pub fn read_env_value(plist_text: &str, key: &str) -> Option<String> {
        let needle = format!("\t\t<key>{}</key>\n", xml_escape(key));
        let start = plist_text.find(&needle)?;
        let rest = &plist_text[start.saturating_add(needle.len())..];
        let value = rest
            .strip_prefix("\t\t<string>")?
            .split_once("</string>")?
            .0;
        Some(xml_unescape(value))
    }
}

/// Escape the five XML-significant characters.
#[must_use]
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`xml_escape`].
#[must_use]
pub fn xml_unescape(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ServiceDefinition {
        let mut env = BTreeMap::new();
        env.insert("MCPLI_TIMEOUT".to_string(), "1800000".to_string());
        env.insert("MCPLI_COMMAND".to_string(), "node".to_string());
        env.insert("API_KEY".to_string(), "a&b<c>\"d'".to_string());
        ServiceDefinition {
            label: "com.mcpli.11111111.deadbeef".to_string(),
            program_arguments: vec![
                "/usr/local/bin/mcpli".to_string(),
                "daemon".to_string(),
                "run".to_string(),
            ],
            working_directory: PathBuf::from("/project"),
            env,
            socket_path: PathBuf::from("/tmp/mcpli/11111111/deadbeef.sock"),
        }
    }

    #[test]
    fn equal_inputs_render_equal_bytes() {
        assert_eq!(definition().render(), definition().render());
    }

    #[test]
    fn env_order_does_not_affect_bytes() {
        let mut a = definition();
        let mut b = definition();
        // BTreeMap sorts on insert; inserting in opposite orders must not
        // change the rendering.
        a.env.insert("ZZZ".to_string(), "1".to_string());
        a.env.insert("AAA".to_string(), "2".to_string());
        b.env.insert("AAA".to_string(), "2".to_string());
        b.env.insert("ZZZ".to_string(), "1".to_string());
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn renders_required_keys() {
        let xml = definition().render();
        assert!(xml.contains("<key>Label</key>"));
        assert!(xml.contains("<key>ProgramArguments</key>"));
        assert!(xml.contains("<key>WorkingDirectory</key>"));
        assert!(xml.contains("<key>EnvironmentVariables</key>"));
        assert!(xml.contains("<key>Sockets</key>"));
        assert!(xml.contains("<key>SockPathName</key>"));
        assert!(xml.contains("<integer>384</integer>"));
        assert!(xml.contains("<key>SuccessfulExit</key>\n\t\t<false/>"));
        assert!(xml.contains("<string>Background</string>"));
    }

    #[test]
    fn xml_significant_characters_are_escaped() {
        let xml = definition().render();
        assert!(xml.contains("a&amp;b&lt;c&gt;&quot;d&apos;"));
        assert!(!xml.contains("a&b<c>"));
    }

    #[test]
    fn escape_round_trips() {
        let nasty = "&<>\"'&amp;";
        assert_eq!(xml_unescape(&xml_escape(nasty)), nasty);
    }

    #[test]
    fn env_values_read_back() {
        let xml = definition().render();
        assert_eq!(
            ServiceDefinition::read_env_value(&xml, "MCPLI_TIMEOUT").as_deref(),
            Some("1800000")
        );
        assert_eq!(
            ServiceDefinition::read_env_value(&xml, "API_KEY").as_deref(),
            Some("a&b<c>\"d'")
        );
        assert!(ServiceDefinition::read_env_value(&xml, "ABSENT").is_none());
    }
}
