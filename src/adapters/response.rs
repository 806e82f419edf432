//! Minimal response type rendered onto the send channel.
use std::fmt;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
};

use crate::ports::{
    app::{AppError, AppResult},
    channel::SharedSender,
    message::Message,
    scope::{RawHeaders, Scope},
};

/// Response payload: fully buffered, or a lazy stream of chunks.
pub enum Body {
    Full(Bytes),
    Stream(BoxStream<'static, AppResult<Bytes>>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// HTTP response produced by endpoints and middleware dispatch functions.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Full(body.into()),
        }
    }

    pub fn plain_text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut response = Self::new(status, text.into());
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Empty-bodied redirect to `location`.
    pub fn redirect(location: &str, status: StatusCode) -> AppResult<Self> {
        let value = HeaderValue::from_str(location)
            .map_err(|err| AppError::Other(eyre::eyre!("invalid redirect location {location:?}: {err}")))?;
        let mut response = Self::new(status, Bytes::new());
        response.headers.insert(LOCATION, value);
        Ok(response)
    }

    pub fn streaming<S>(status: StatusCode, stream: S) -> Self
    where
        S: Stream<Item = AppResult<Bytes>> + Send + 'static,
    {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Stream(stream.boxed()),
        }
    }

    /// Rebuild a response from a raw start message and a body stream.
    pub fn from_raw_parts<S>(status: u16, headers: &RawHeaders, stream: S) -> AppResult<Self>
    where
        S: Stream<Item = AppResult<Bytes>> + Send + 'static,
    {
        let status = StatusCode::from_u16(status)
            .map_err(|_| AppError::protocol(format!("invalid response status {status}")))?;
        let mut response = Self::streaming(status, stream);
        response.headers = header_map(headers);
        Ok(response)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid response header"),
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Emit `http.response.start` followed by the body messages.
    ///
    /// `HEAD` requests get the headers (including `content-length`) but no
    /// body bytes. Stream errors are returned after the start message has
    /// already gone out.
    pub async fn send(self, scope: &Scope, send: &SharedSender) -> AppResult<()> {
        let head_only = scope.method.as_ref() == Some(&Method::HEAD);
        let Response {
            status,
            mut headers,
            body,
        } = self;

        if let Body::Full(bytes) = &body {
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }
        }

        send.send(Message::HttpResponseStart {
            status: status.as_u16(),
            headers: raw_headers(&headers),
        })
        .await?;

        match body {
            Body::Full(bytes) => {
                let body = if head_only { Bytes::new() } else { bytes };
                send.send(Message::HttpResponseBody {
                    body,
                    more_body: false,
                })
                .await
            }
            Body::Stream(mut stream) => {
                if !head_only {
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        if chunk.is_empty() {
                            continue;
                        }
                        send.send(Message::HttpResponseBody {
                            body: chunk,
                            more_body: true,
                        })
                        .await?;
                    }
                }
                send.send(Message::HttpResponseBody {
                    body: Bytes::new(),
                    more_body: false,
                })
                .await
            }
        }
    }
}

/// Convert raw wire headers into a `HeaderMap`, skipping invalid pairs.
pub fn header_map(raw: &RawHeaders) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        match (
            HeaderName::from_bytes(name),
            HeaderValue::from_bytes(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(name = ?name, "Skipping invalid header"),
        }
    }
    headers
}

/// Convert a `HeaderMap` into raw wire headers (lowercase names).
pub fn raw_headers(headers: &HeaderMap) -> RawHeaders {
    headers
        .iter()
        .map(|(name, value)| {
            (
                Bytes::copy_from_slice(name.as_str().as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            )
        })
        .collect()
}
