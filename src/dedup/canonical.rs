use url::Url;

/// Query parameters that only carry campaign or referrer noise.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "_hsenc", "_hsmi",
    "ref", "ref_src",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalize a URL into the dedup key: lowercase scheme and host, no
/// fragment, no tracking parameters, no trailing slash. Unparseable input is
/// returned trimmed. `canonicalize_url(canonicalize_url(u)) == canonicalize_url(u)`.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    if url.query().is_some() {
        // Always re-encode, so `%20` and `+` spellings of one query agree.
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut out = url.to_string();
    if url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_and_tracking_noise_collapse() {
        let a = canonicalize_url("https://a.example/x");
        let b = canonicalize_url("https://a.example/x/?utm_source=hn&utm_medium=social");
        assert_eq!(a, b);
        assert_eq!(a, "https://a.example/x");
    }

    #[test]
    fn scheme_and_host_casing_are_normalized() {
        assert_eq!(
            canonicalize_url("HTTPS://News.Example.COM/Path#comments"),
            "https://news.example.com/Path"
        );
    }

    #[test]
    fn meaningful_query_is_kept_in_order() {
        assert_eq!(
            canonicalize_url("https://news.ycombinator.com/item?id=42&utm_campaign=x"),
            "https://news.ycombinator.com/item?id=42"
        );
        assert_eq!(
            canonicalize_url("https://a.example/search?q=rust+lang&page=2"),
            "https://a.example/search?q=rust+lang&page=2"
        );
    }

    #[test]
    fn query_encoding_does_not_depend_on_tracking_noise() {
        let noisy = canonicalize_url("https://a.example/search?q=rust%20async&utm_source=hn");
        let clean = canonicalize_url("https://a.example/search?q=rust%20async");
        let plus = canonicalize_url("https://a.example/search?q=rust+async");
        assert_eq!(noisy, clean);
        assert_eq!(clean, plus);
        assert_eq!(clean, "https://a.example/search?q=rust+async");
    }

    #[test]
    fn root_urls_lose_the_slash() {
        assert_eq!(canonicalize_url("https://a.example/"), "https://a.example");
        assert_eq!(canonicalize_url("https://a.example"), "https://a.example");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            "https://A.example/x/",
            "https://a.example/?utm_source=x",
            "https://a.example/a//",
            "https://a.example/p?b=2&fbclid=zz&a=1#top",
            "https://a.example/q?name=%ED%95%9C+%EA%B8%80",
            "https://a.example/search?q=rust%20async&utm_source=hn",
            "https://a.example/p?flag&x=%2F",
            "https://a.example/?",
            "not a url",
            "  https://a.example/trim  ",
        ];
        for input in inputs {
            let once = canonicalize_url(input);
            assert_eq!(canonicalize_url(&once), once, "input: {input}");
        }
    }
}
