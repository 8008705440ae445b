//! Address-list parsing (RFC 5322 §3.4) for `To:` and `Cc:` headers.

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single mailbox. Returns `None` when no `local@domain` address
    /// can be found.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        // "Display Name <address>" or "<address>"
        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end <= angle_start {
                return None;
            }
            let addr = trimmed[angle_start + 1..angle_end].trim();
            if !is_plausible_address(addr) {
                return None;
            }
            return Some(Self {
                display_name: strip_quotes(&trimmed[..angle_start]),
                address: addr.to_string(),
            });
        }

        // "user@domain.com (Comment)"
        let bare = match trimmed.find('(') {
            Some(pos) => trimmed[..pos].trim(),
            None => trimmed,
        };
        is_plausible_address(bare).then(|| Self {
            display_name: String::new(),
            address: bare.to_string(),
        })
    }

    /// Parse an address list, dropping malformed entries.
    ///
    /// Handles quoted commas (`"Last, First" <a@b.com>, other@c.com`) and
    /// group syntax (`Team: a@b.com, c@d.com;`), whose members are flattened.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                // Group name: everything so far was the label
                ':' if !in_quotes && !in_angle => current.clear(),
                ',' | ';' if !in_quotes && !in_angle => {
                    results.extend(Self::parse(&current));
                    current.clear();
                }
                _ => current.push(ch),
            }
        }

        results.extend(Self::parse(&current));
        results
    }
}

/// Split a decoded `To:`/`Cc:` value into bare addresses, in header order.
pub fn address_list(raw: &str) -> Vec<String> {
    EmailAddress::parse_list(raw)
        .into_iter()
        .map(|a| a.address)
        .collect()
}

fn is_plausible_address(s: &str) -> bool {
    match s.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}
