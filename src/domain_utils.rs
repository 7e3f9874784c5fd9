/// Domain helpers shared by the sender parser, the identity verifier and the
/// footprint lookups.
pub struct DomainUtils;

const TWO_PART_TLDS: &[&str] = &[
    "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in", "com.sg", "co.nz",
    "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk", "edu.au",
];

impl DomainUtils {
    /// Extract the domain from an email address, tolerating SMTP artifacts
    /// such as trailing `>`, `,param` or `;param`.
    pub fn extract_domain(email: &str) -> Option<String> {
        let at_pos = email.rfind('@')?;
        if at_pos == 0 {
            return None;
        }

        let domain = email[at_pos + 1..]
            .split_whitespace()
            .next()?
            .split('>')
            .next()?
            .split(',')
            .next()?
            .split(';')
            .next()?
            .trim();

        if domain.contains('.')
            && domain.len() < 255
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            Some(domain.to_lowercase())
        } else {
            None
        }
    }

    /// Registrable root of a domain, e.g. `mail.example.co.uk` -> `example.co.uk`.
    pub fn root_domain(domain: &str) -> String {
        let parts: Vec<&str> = domain.split('.').collect();
        if parts.len() < 2 {
            return domain.to_string();
        }

        let last_two = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
        if parts.len() >= 3 && TWO_PART_TLDS.contains(&last_two.as_str()) {
            return format!("{}.{}", parts[parts.len() - 3], last_two);
        }
        last_two
    }

    /// Check if domain matches any in list (with hierarchy support)
    pub fn matches_domain_list(domain: &str, domain_list: &[String]) -> bool {
        let domain_lower = Self::canonicalize_domain(domain);

        domain_list.iter().any(|pattern| {
            let pattern_lower = pattern.to_lowercase();
            domain_lower == pattern_lower || domain_lower.ends_with(&format!(".{pattern_lower}"))
        })
    }

    /// Lowercase and strip a leading `www.`
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.trim().to_lowercase();
        match domain_lower.strip_prefix("www.") {
            Some(stripped) => stripped.to_string(),
            None => domain_lower,
        }
    }
}
