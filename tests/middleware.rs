// Request/response middleware stacked on an Application
mod common;

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use futures_util::stream;
    use http::{HeaderValue, Method, StatusCode};
    use trellis::{
        AppError, AppResult, Application, Endpoint, Next, Request, Response, Router, Scope,
        adapters::middleware::{dispatch_fn, request_id_middleware, security_headers_middleware},
    };

    use crate::common::send_request;

    async fn countdown(_req: Request) -> AppResult<Response> {
        let chunks = ["3,", "2,", "1,", "liftoff"].map(|c| Ok::<_, AppError>(Bytes::from_static(c.as_bytes())));
        Ok(Response::streaming(StatusCode::OK, stream::iter(chunks)))
    }

    async fn echo(mut req: Request) -> AppResult<Response> {
        let body = req.body().await?;
        Ok(Response::new(StatusCode::OK, body))
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .add_route("/countdown", Endpoint::handler(countdown), None, None)
            .unwrap()
            .add_route("/echo", Endpoint::handler(echo), Some(&["POST"]), None)
            .unwrap();
        router
    }

    #[tokio::test]
    async fn test_streamed_body_passes_through_header_middleware() {
        let app = Application::builder(router())
            .dispatch(dispatch_fn(security_headers_middleware))
            .dispatch(dispatch_fn(request_id_middleware))
            .build();

        let (result, response) = send_request(&app, Scope::http(Method::GET, "/countdown"), "").await;
        result.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "3,2,1,liftoff");
        assert_eq!(response.header("x-frame-options"), Some("DENY"));
        let request_id = response.header("x-request-id").unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_body_read_by_middleware_reaches_endpoint() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let audit = {
            let seen = Arc::clone(&seen);
            dispatch_fn(move |mut req: Request, next: Next| {
                let seen = Arc::clone(&seen);
                async move {
                    let body = req.body().await?;
                    seen.lock().unwrap().push(body);
                    let mut response = next.run(req).await?;
                    response
                        .headers_mut()
                        .insert("x-audited", HeaderValue::from_static("yes"));
                    Ok::<_, AppError>(response)
                }
            })
        };
        let app = Application::builder(router()).dispatch(audit).build();

        let (result, response) =
            send_request(&app, Scope::http(Method::POST, "/echo"), "{\"amount\":5}").await;
        result.unwrap();
        assert_eq!(response.body, "{\"amount\":5}");
        assert_eq!(response.header("x-audited"), Some("yes"));
        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"{\"amount\":5}")]);
    }

    #[tokio::test]
    async fn test_routing_errors_propagate_through_middleware() {
        let app = Application::builder(router())
            .dispatch(dispatch_fn(security_headers_middleware))
            .build();

        let (result, response) = send_request(&app, Scope::http(Method::GET, "/missing"), "").await;
        result.unwrap();
        assert_eq!(response.status, 404);

        let (result, response) = send_request(&app, Scope::http(Method::GET, "/echo"), "").await;
        result.unwrap();
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_app() {
        let deny = dispatch_fn(|req: Request, next: Next| async move {
            if req.connection().header("authorization").is_none() {
                return Ok(Response::plain_text(StatusCode::UNAUTHORIZED, "Unauthorized"));
            }
            next.run(req).await
        });
        let app = Application::builder(router()).dispatch(deny).build();

        let (_, response) = send_request(&app, Scope::http(Method::GET, "/countdown"), "").await;
        assert_eq!(response.status, 401);
        assert_eq!(response.body, "Unauthorized");

        let scope = Scope::http(Method::GET, "/countdown").with_header("authorization", "Bearer t");
        let (_, response) = send_request(&app, scope, "").await;
        assert_eq!(response.status, 200);
    }
}
