use super::backend::BrowserPage;
use crate::error::SurferResult;

const CHROME_TOKEN: &str = "Chrome/";

/// Rewrites the first `Chrome/<a>.<b>.<c>.<d>` token to `Chrome/<version>`.
/// Agents without a four-part Chrome token are returned unchanged.
pub fn normalize_user_agent(user_agent: &str, version: &str) -> String {
    let mut search_from = 0;
    while let Some(offset) = user_agent[search_from..].find(CHROME_TOKEN) {
        let start = search_from + offset + CHROME_TOKEN.len();
        if let Some(len) = dotted_version_len(&user_agent[start..]) {
            return format!(
                "{}{}{}",
                &user_agent[..start],
                version,
                &user_agent[start + len..]
            );
        }
        search_from = start;
    }
    user_agent.to_string()
}

/// Length of a leading `\d+(\.\d+){3}` match.
fn dotted_version_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    for part in 0..4 {
        if part > 0 {
            if bytes.get(pos) != Some(&b'.') {
                return None;
            }
            pos += 1;
        }
        let digits = bytes[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        pos += digits;
    }
    Some(pos)
}

/// Settings applied to every page on attach and after every navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct PageHygiene {
    pub chrome_version: String,
    pub zoom_factor: f64,
}

impl PageHygiene {
    pub async fn apply(&self, page: &mut dyn BrowserPage) -> SurferResult<()> {
        let current = page.user_agent();
        let normalized = normalize_user_agent(&current, &self.chrome_version);
        if normalized != current {
            page.set_user_agent(&normalized).await?;
        }
        if page.zoom_factor() != self.zoom_factor {
            page.set_zoom_factor(self.zoom_factor).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.6778.85 Safari/537.36";

    #[test]
    fn test_rewrites_chrome_version() {
        let ua = normalize_user_agent(DESKTOP_UA, "127.0.0.0");
        assert!(ua.contains("Chrome/127.0.0.0 Safari/537.36"));
        assert!(!ua.contains("131.0.6778.85"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_user_agent(DESKTOP_UA, "127.0.0.0");
        let twice = normalize_user_agent(&once, "127.0.0.0");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_leaves_other_agents_alone() {
        let firefox = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
        assert_eq!(normalize_user_agent(firefox, "127.0.0.0"), firefox);

        let short = "Agent Chrome/120.0 Electron/31.0.0";
        assert_eq!(normalize_user_agent(short, "127.0.0.0"), short);
    }

    #[test]
    fn test_skips_incomplete_token_and_rewrites_next() {
        let ua = "HeadlessChrome/abc Chrome/120.1.2.3";
        assert_eq!(
            normalize_user_agent(ua, "127.0.0.0"),
            "HeadlessChrome/abc Chrome/127.0.0.0"
        );
    }

    #[test]
    fn test_only_first_token_rewritten() {
        let ua = "Chrome/1.2.3.4 Chrome/5.6.7.8";
        assert_eq!(
            normalize_user_agent(ua, "127.0.0.0"),
            "Chrome/127.0.0.0 Chrome/5.6.7.8"
        );
    }
}
