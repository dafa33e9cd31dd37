mod fetcher;
mod paths;
mod request;

pub use fetcher::{Fetcher, HttpConfig, HttpFetcher};
pub use paths::{canonical_key, decoded_path, folder_of, path_matches_prefix, split_path};
pub use request::{FOLDER_POSITION_HEADER, Request, Response, cache_layer_error_status};
