//! POSIX shell quoting and privilege wrapping.

use crate::types::Target;

/// Quote `value` as a single POSIX shell word.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,@%+".contains(&b))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Wrap `command` so it runs as root on `target`.
///
/// Root logins run the command as is. Named non-root users go through
/// `sudo -n`. Without a configured user the remote uid decides.
pub fn privileged(target: &Target, command: &str) -> String {
    if target.is_root() {
        return command.to_string();
    }
    let quoted = quote(command);
    match target.user {
        Some(_) => format!("sudo -n sh -c {quoted}"),
        None => format!(
            "if [ \"$(id -u)\" -eq 0 ]; then sh -c {quoted}; else sudo -n sh -c {quoted}; fi"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn sh_echo(word: &str) -> String {
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("printf %s {word}"))
            .output()
            .unwrap();
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("/etc/wireguard/wg-lab0.conf"), "/etc/wireguard/wg-lab0.conf");
    }

    #[test]
    fn test_quote_special() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_quote_survives_shell() {
        for value in ["plain", "two words", "it's", "$(id -u)", "a;b|c&&d", "\"q\"", "back\\slash"] {
            assert_eq!(sh_echo(&quote(value)), value);
        }
    }

    #[test]
    fn test_privileged_root() {
        let target = Target::new("a").with_user("root");
        assert_eq!(privileged(&target, "ip link"), "ip link");
    }

    #[test]
    fn test_privileged_sudo() {
        let target = Target::new("a").with_user("ops");
        assert_eq!(privileged(&target, "ip link"), "sudo -n sh -c 'ip link'");
    }

    #[test]
    fn test_privileged_unknown_user() {
        let wrapped = privileged(&Target::new("a"), "wg show");
        assert!(wrapped.starts_with("if [ \"$(id -u)\" -eq 0 ]"));
        assert!(wrapped.contains("then sh -c 'wg show'"));
        assert!(wrapped.contains("else sudo -n sh -c 'wg show'"));
    }
}
