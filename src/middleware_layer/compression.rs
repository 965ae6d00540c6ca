use axum::{body::HttpBody, http::Response};
use tower_http::compression::{CompressionLayer, Predicate};

/// Smallest response body that is gzipped.
pub const MIN_COMPRESSED_BODY: u64 = 64 * 1024;

/// Compresses only bodies of a known size of at least [`MIN_COMPRESSED_BODY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeBody;

impl Predicate for LargeBody {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        response
            .body()
            .size_hint()
            .exact()
            .is_some_and(|size| size >= MIN_COMPRESSED_BODY)
    }
}

/// Gzip for clients that accept it. Must wrap the signer so the
/// signature covers the uncompressed body.
pub fn compression_layer() -> CompressionLayer<LargeBody> {
    CompressionLayer::new()
        .gzip(true)
        .no_br()
        .no_deflate()
        .no_zstd()
        .compress_when(LargeBody)
}
