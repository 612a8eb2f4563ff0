#![allow(dead_code)]

//! Local ICY server serving a synthetic MP3 stream.
//!
//! Routes:
//!   /live     endless stream, metadata every `META_INTERVAL` audio bytes
//!   /short    `SHORT_FRAMES` frames, then the connection closes
//!   /missing  404
//!   /plain    200 without `icy-metaint`

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;

pub const META_INTERVAL: usize = 1024;
pub const FRAME_LEN: usize = 417;
pub const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x64];
pub const SHORT_FRAMES: usize = 20;
pub const TITLE: &str = "Test Artist - Test Song";

const CHUNK_AUDIO: usize = 2048;
const CHUNK_PAUSE: Duration = Duration::from_millis(5);

/// Produces audio bytes as back-to-back frames and interleaves metadata.
#[derive(Debug, Default)]
pub struct IcyEncoder {
    since_meta: usize,
    frame_pos: usize,
    blocks: usize,
}

impl IcyEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn audio_byte(&mut self) -> u8 {
        let b = if self.frame_pos < 4 {
            FRAME_HEADER[self.frame_pos]
        } else {
            // Payload stays clear of 0xFF except for a planted 0xFF 0xFB pair.
            match self.frame_pos {
                100 => 0xFF,
                101 => 0xFB,
                n => (n % 251) as u8,
            }
        };
        self.frame_pos = (self.frame_pos + 1) % FRAME_LEN;
        b
    }

    fn meta_block(&mut self) -> Vec<u8> {
        self.blocks += 1;
        // Every other block is empty.
        if self.blocks % 2 == 0 {
            return vec![0];
        }
        let text = format!("StreamTitle='{}';", TITLE);
        let len = text.len().div_ceil(16);
        let mut block = vec![len as u8];
        block.extend_from_slice(text.as_bytes());
        block.resize(1 + len * 16, 0);
        block
    }

    /// Next `audio` audio bytes plus whatever metadata falls between them.
    pub fn next_chunk(&mut self, audio: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(audio + 64);
        for _ in 0..audio {
            if self.since_meta == META_INTERVAL {
                out.extend(self.meta_block());
                self.since_meta = 0;
            }
            out.push(self.audio_byte());
            self.since_meta += 1;
        }
        out
    }
}

fn icy_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "audio/mpeg")
        .header("icy-name", "Mock FM")
        .header("icy-metaint", META_INTERVAL.to_string())
        .body(body)
        .unwrap()
}

async fn live() -> Response {
    let stream = futures_util::stream::unfold(IcyEncoder::new(), |mut enc| async move {
        tokio::time::sleep(CHUNK_PAUSE).await;
        let chunk = enc.next_chunk(CHUNK_AUDIO);
        Some((Ok::<_, Infallible>(chunk), enc))
    });
    icy_response(Body::from_stream(stream))
}

async fn short() -> Response {
    let body = IcyEncoder::new().next_chunk(SHORT_FRAMES * FRAME_LEN);
    icy_response(Body::from(body))
}

async fn missing() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap()
}

async fn plain() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "audio/mpeg")
        .body(Body::from(IcyEncoder::new().next_chunk(4 * FRAME_LEN)))
        .unwrap()
}

/// Start the server on an ephemeral port; returns its base URL.
pub async fn start() -> String {
    let app = Router::new()
        .route("/live", get(live))
        .route("/short", get(short))
        .route("/missing", get(missing))
        .route("/plain", get(plain));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock ICY server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}
