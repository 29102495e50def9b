use http::Uri;

/// Trait for cookie storage. Parsing and policy of cookies is left to implementor.
///
/// Cookies are passed as raw header values. `Set-Cookie` values on response side and
/// `name=value` pairs on request side.
pub trait CookieJar: Send + Sync {
    fn save_from_response(&self, uri: &Uri, cookies: Vec<String>);

    fn load_for_request(&self, uri: &Uri) -> Vec<String>;
}

/// default jar accepting no cookie and providing no cookie.
pub struct NoCookies;

impl CookieJar for NoCookies {
    fn save_from_response(&self, _: &Uri, _: Vec<String>) {}

    fn load_for_request(&self, _: &Uri) -> Vec<String> {
        Vec::new()
    }
}
