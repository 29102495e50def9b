use http::{HeaderMap, header::CACHE_CONTROL, header::PRAGMA};

/// Directives of `Cache-Control` (and legacy `Pragma`) headers of a request or response.
///
/// Malformed second values are treated as absent and oversized ones saturate. `max-stale` without
/// a value accepts any staleness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<u32>,
    pub s_max_age: Option<u32>,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub max_stale: Option<u32>,
    pub min_fresh: Option<u32>,
    pub only_if_cached: bool,
    pub no_transform: bool,
    pub immutable: bool,
}

impl CacheControl {
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut this = Self::default();

        let values = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .chain(headers.get_all(PRAGMA).iter())
            .filter_map(|v| v.to_str().ok());

        for value in values {
            for (directive, param) in Directives::new(value) {
                match directive.to_ascii_lowercase().as_str() {
                    "no-cache" => this.no_cache = true,
                    "no-store" => this.no_store = true,
                    "max-age" => this.max_age = param.and_then(parse_seconds),
                    "s-maxage" => this.s_max_age = param.and_then(parse_seconds),
                    "private" => this.private = true,
                    "public" => this.public = true,
                    "must-revalidate" => this.must_revalidate = true,
                    "max-stale" => this.max_stale = Some(param.and_then(parse_seconds).unwrap_or(u32::MAX)),
                    "min-fresh" => this.min_fresh = param.and_then(parse_seconds),
                    "only-if-cached" => this.only_if_cached = true,
                    "no-transform" => this.no_transform = true,
                    "immutable" => this.immutable = true,
                    _ => {}
                }
            }
        }

        this
    }
}

/// delta seconds. out of range value saturates.
fn parse_seconds(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse::<u64>().map_or(u32::MAX, |n| n.min(u32::MAX as u64) as u32))
}

/// iterator of `directive[=param]` pairs separated by `,` or `;`. param can be quoted.
struct Directives<'a> {
    rest: &'a str,
}

impl<'a> Directives<'a> {
    fn new(value: &'a str) -> Self {
        Self { rest: value }
    }
}

impl<'a> Iterator for Directives<'a> {
    type Item = (&'a str, Option<&'a str>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.rest.is_empty() {
                return None;
            }

            let end = self.rest.find(['=', ',', ';']).unwrap_or(self.rest.len());
            let directive = self.rest[..end].trim();
            let delim = self.rest[end..].chars().next();
            self.rest = self.rest.get(end + 1..).unwrap_or("");

            let param = match delim {
                Some('=') => {
                    let rest = self.rest.trim_start();
                    if let Some(quoted) = rest.strip_prefix('"') {
                        let end = quoted.find('"').unwrap_or(quoted.len());
                        let param = &quoted[..end];
                        let rest = quoted.get(end + 1..).unwrap_or("");
                        let next = rest.find([',', ';']).map_or("", |i| &rest[i + 1..]);
                        self.rest = next;
                        Some(param)
                    } else {
                        let end = rest.find([',', ';']).unwrap_or(rest.len());
                        let param = rest[..end].trim();
                        self.rest = rest.get(end + 1..).unwrap_or("");
                        Some(param)
                    }
                }
                _ => None,
            };

            if !directive.is_empty() {
                return Some((directive, param));
            }
        }
    }
}
