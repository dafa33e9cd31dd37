//! worker 拦截的请求分类

use reqwest::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `<prefix><collection>/audio/...`，不带 seek 参数
    Audio,
    /// `<prefix>(<collection>/)?(folder|collections|transcodings)...`
    Api,
    /// 应用壳静态资源
    Static,
    /// 不拦截
    Other,
}

const API_SEGMENTS: [&str; 3] = ["folder", "collections", "transcodings"];

pub fn classify(prefix: &str, url: &Url, static_resources: &[String]) -> Route {
    let path = url.path();
    let Some(rest) = path.strip_prefix(prefix) else {
        return Route::Other;
    };

    if is_audio_path(rest) {
        let seeking = url
            .query_pairs()
            .any(|(k, v)| k == "seek" && !v.is_empty());
        return if seeking { Route::Other } else { Route::Audio };
    }
    if is_api_path(rest) {
        return Route::Api;
    }
    if path == prefix || static_resources.iter().any(|r| r == rest) {
        return Route::Static;
    }
    Route::Other
}

fn leading_collection(rest: &str) -> Option<&str> {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    rest[digits..].strip_prefix('/')
}

fn is_audio_path(rest: &str) -> bool {
    leading_collection(rest).is_some_and(|r| r.starts_with("audio/"))
}

fn is_api_path(rest: &str) -> bool {
    let rest = leading_collection(rest).unwrap_or(rest);
    API_SEGMENTS.iter().any(|seg| rest.starts_with(seg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> Route {
        let statics = vec!["index.html".to_owned(), "bundle.js".to_owned()];
        classify("/", &Url::parse(&format!("http://h{path}")).unwrap(), &statics)
    }

    #[test]
    fn test_audio_routes() {
        assert_eq!(route("/1/audio/book/01.mp3"), Route::Audio);
        assert_eq!(route("/12/audio/book/01.mp3?trans=m"), Route::Audio);
        assert_eq!(route("/1/audio/book/01.mp3?seek=30"), Route::Other);
        assert_eq!(route("/x/audio/book/01.mp3"), Route::Other);
    }

    #[test]
    fn test_api_routes() {
        assert_eq!(route("/1/folder/book"), Route::Api);
        assert_eq!(route("/collections"), Route::Api);
        assert_eq!(route("/transcodings"), Route::Api);
        assert_eq!(route("/1/positions"), Route::Other);
    }

    #[test]
    fn test_static_routes() {
        assert_eq!(route("/"), Route::Static);
        assert_eq!(route("/index.html"), Route::Static);
        assert_eq!(route("/other.css"), Route::Other);
    }

    #[test]
    fn test_prefix_is_respected() {
        let statics = vec!["index.html".to_owned()];
        let u = Url::parse("http://h/app/3/audio/f/a.mp3").unwrap();
        assert_eq!(classify("/app/", &u, &statics), Route::Audio);
        let outside = Url::parse("http://h/3/audio/f/a.mp3").unwrap();
        assert_eq!(classify("/app/", &outside, &statics), Route::Other);
    }
}
