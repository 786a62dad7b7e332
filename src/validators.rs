//! Input validation and sanitization functions for Firelet
//!
//! This module provides centralized validation for names, ports and interface
//! names so that nothing unsafe ends up inside generated iptables statements
//! (rule names are embedded in `--log-prefix` arguments).

/// ICMP types accepted in ICMP service definitions, with their iptables names.
pub const ICMP_TYPES: &[(u8, &str)] = &[
    (0, "echo-reply"),
    (3, "destination-unreachable"),
    (4, "source-quench"),
    (5, "redirect"),
    (8, "echo-request"),
    (9, "router-advertisement"),
    (10, "router-solicitation"),
    (11, "ttl-exceeded"),
    (12, "parameter-problem"),
    (13, "timestamp-request"),
    (14, "timestamp-reply"),
    (17, "address-mask-request"),
    (18, "address-mask-reply"),
];

/// Returns the iptables name of an ICMP type, if known.
pub fn icmp_type_name(code: u8) -> Option<&'static str> {
    ICMP_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Tells if a character may appear in a rule name.
///
/// Printable ASCII only, excluding `"`, `'`, `<`, `>` and backtick.
pub const fn valid_name_char(c: char) -> bool {
    matches!(c, ' '..='~') && !matches!(c, '"' | '\'' | '<' | '>' | '`')
}

/// Removes characters that are not allowed in rule names.
///
/// # Examples
///
/// ```
/// use firelet::validators::sanitize_name;
///
/// assert_eq!(sanitize_name("ssh \"admin\" <x>"), "ssh admin x");
/// assert_eq!(sanitize_name("tab\there"), "tabhere");
/// ```
pub fn sanitize_name(input: &str) -> String {
    input.chars().filter(|c| valid_name_char(*c)).collect()
}

/// Validates a rule name against the character whitelist.
///
/// # Errors
///
/// Returns `Err` naming the first offending character.
pub fn validate_rule_name(name: &str) -> Result<(), String> {
    if let Some(bad) = name.chars().find(|c| !valid_name_char(*c)) {
        return Err(format!("Invalid character in '{name}': {bad:?}"));
    }
    Ok(())
}

/// Validates a TCP/UDP port list: comma separated blocks, each `p` or `lo:hi`.
///
/// An empty string means "any port" and is accepted.
///
/// # Errors
///
/// Returns `Err` if a block is not numeric, has more than two items, is out of
/// range or is reversed.
pub fn validate_port_list(ports: &str) -> Result<(), String> {
    if ports.is_empty() {
        return Ok(());
    }
    for block in ports.split(',') {
        let numbers = block
            .split(':')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("Incorrect syntax in port definition '{block}'"))?;

        if numbers.len() > 2 {
            return Err(format!("Too many items in port range '{block}'"));
        }
        for &n in &numbers {
            if n < 0 {
                return Err(format!("Negative port number '{n}'"));
            }
            if n > 65535 {
                return Err(format!("Port number too high '{n}'"));
            }
        }
        if let &[lo, hi] = numbers.as_slice()
            && lo > hi
        {
            return Err(format!("Reversed port range '{block}'"));
        }
    }
    Ok(())
}

/// Validates the ports field of an ICMP service: empty or a known ICMP type.
///
/// # Errors
///
/// Returns `Err` if the value is not an integer or not a known ICMP type.
pub fn validate_icmp_type(ports: &str) -> Result<Option<u8>, String> {
    if ports.is_empty() {
        return Ok(None);
    }
    let code: u8 = ports
        .trim()
        .parse()
        .map_err(|_| format!("Invalid ICMP Type '{ports}'"))?;
    if icmp_type_name(code).is_none() {
        return Err(format!("Invalid ICMP Type '{code}'"));
    }
    Ok(Some(code))
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(format!("Interface name '{name}' contains invalid characters"));
    }

    Ok(())
}

/// Parses and validates an IPv4 mask length.
///
/// # Errors
///
/// Returns `Err` if the value is not an integer in `0..=32`.
pub fn parse_masklen(value: &str) -> Result<u8, String> {
    match value.trim().parse::<u8>() {
        Ok(n) if n <= 32 => Ok(n),
        _ => Err(format!("Invalid netmask length '{value}'")),
    }
}

/// Parses a `1`/`0` table flag.
///
/// # Errors
///
/// Returns `Err` for anything other than `1` or `0`.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(format!("Flag must be \"1\" or \"0\", found '{other}'")),
    }
}
