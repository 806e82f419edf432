// End-to-end routing through an Application: mounts, hosts, redirects and reverse lookups
mod common;

#[cfg(test)]
mod test {
    use http::{Method, StatusCode};
    use trellis::{
        AppError, AppResult, Application, Endpoint, PathParams, Request, Response, Router, Scope,
        config::AppConfig,
    };

    use crate::common::send_request;

    async fn show_user(req: Request) -> AppResult<Response> {
        let conn = req.connection();
        let id = conn
            .path_params()
            .get("id")
            .and_then(|v| v.as_int())
            .unwrap_or_default();
        Ok(Response::plain_text(
            StatusCode::OK,
            format!("{}|{id}", conn.scope().root_path),
        ))
    }

    async fn tenant_home(req: Request) -> AppResult<Response> {
        let tenant = req
            .connection()
            .path_params()
            .get("tenant")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Response::plain_text(StatusCode::OK, tenant))
    }

    async fn list_items(req: Request) -> AppResult<Response> {
        let page = req.connection().query_param("page").unwrap_or("1").to_string();
        Ok(Response::plain_text(StatusCode::OK, format!("page {page}")))
    }

    async fn echo(mut req: Request) -> AppResult<Response> {
        let body = req.body().await?;
        Ok(Response::new(StatusCode::CREATED, body))
    }

    async fn link_to_tenant(req: Request) -> AppResult<Response> {
        let params = PathParams::from([("tenant", "acme")]);
        let url = req
            .connection()
            .url_for("tenants:home", params)
            .map_err(eyre::Report::new)?;
        Ok(Response::plain_text(StatusCode::OK, url.to_string()))
    }

    fn application(config: AppConfig) -> Application {
        let mut api = Router::new();
        api.add_route("/users/{id:int}", Endpoint::handler(show_user), Some(&["GET"]), Some("user"))
            .unwrap();

        let mut tenants = Router::new();
        tenants
            .add_route("/", Endpoint::handler(tenant_home), None, Some("home"))
            .unwrap();

        let mut router = Router::new();
        router
            .host_router("{tenant}.example.org", tenants, Some("tenants"))
            .unwrap()
            .mount_router("/api", api, Some("api"))
            .unwrap()
            .add_route("/items/", Endpoint::handler(list_items), Some(&["GET"]), Some("items"))
            .unwrap()
            .add_route("/echo", Endpoint::handler(echo), Some(&["POST"]), None)
            .unwrap()
            .add_route("/link", Endpoint::handler(link_to_tenant), None, None)
            .unwrap();
        Application::builder(router).config(config).build()
    }

    #[tokio::test]
    async fn test_mounted_route_sees_root_path_and_typed_params() {
        let app = application(AppConfig::default());
        let scope = Scope::http(Method::GET, "/api/users/42").with_header("host", "localhost");
        let (result, response) = send_request(&app, scope, "").await;
        result.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "/api|42");
    }

    #[tokio::test]
    async fn test_host_route_extracts_subdomain() {
        let app = application(AppConfig::default());
        let scope = Scope::http(Method::GET, "/").with_header("host", "acme.example.org:8000");
        let (result, response) = send_request(&app, scope, "").await;
        result.unwrap();
        assert_eq!(response.body, "acme");
    }

    #[tokio::test]
    async fn test_reverse_lookup_through_mount_and_host() {
        let app = application(AppConfig::default());

        let params = PathParams::from([("id", 7i64)]);
        assert_eq!(app.url_path_for("api:user", params).unwrap(), "/api/users/7");

        let url = app
            .url_path_for("tenants:home", PathParams::from([("tenant", "acme")]))
            .unwrap();
        assert_eq!(url.host.as_deref(), Some("acme.example.org"));

        let scope = Scope::http(Method::GET, "/link").with_header("host", "www.test");
        let (result, response) = send_request(&app, scope, "").await;
        result.unwrap();
        assert_eq!(response.body, "http://acme.example.org/");
    }

    #[tokio::test]
    async fn test_missing_slash_redirects_with_query() {
        let app = application(AppConfig::default());
        let scope = Scope::http(Method::GET, "/items")
            .with_header("host", "testserver")
            .with_query_string("page=3");
        let (result, response) = send_request(&app, scope, "").await;
        result.unwrap();
        assert_eq!(response.status, 308);
        assert_eq!(response.header("location"), Some("http://testserver/items/?page=3"));
    }

    #[tokio::test]
    async fn test_redirect_status_follows_config() {
        let mut config = AppConfig::default();
        config.routing.redirect_status = 301;
        let app = application(config);
        let scope = Scope::http(Method::GET, "/items").with_header("host", "testserver");
        let (_, response) = send_request(&app, scope, "").await;
        assert_eq!(response.status, 301);

        let mut config = AppConfig::default();
        config.routing.redirect_trailing_slash = false;
        let app = application(config);
        let (_, response) = send_request(&app, Scope::http(Method::GET, "/items"), "").await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_allowed_methods() {
        let app = application(AppConfig::default());
        let (result, response) = send_request(&app, Scope::http(Method::GET, "/echo"), "").await;
        result.unwrap();
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn test_head_gets_headers_without_body() {
        let app = application(AppConfig::default());
        let (_, response) = send_request(&app, Scope::http(Method::HEAD, "/items/"), "").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-length"), Some("6"));
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_request_body_is_echoed() {
        let app = application(AppConfig::default());
        let (result, response) =
            send_request(&app, Scope::http(Method::POST, "/echo"), "hello trellis").await;
        result.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "hello trellis");
    }

    #[tokio::test]
    async fn test_bare_router_renders_not_found_itself() {
        let router = Router::new();
        let (result, response) = send_request(&router, Scope::http(Method::GET, "/nowhere"), "").await;
        assert!(result.is_ok());
        assert_eq!(response.status, 404);
        assert_eq!(response.body, "Not Found");
    }

    #[tokio::test]
    async fn test_int_convertor_rejects_non_digits() {
        let app = application(AppConfig::default());
        let (result, response) =
            send_request(&app, Scope::http(Method::GET, "/api/users/abc"), "").await;
        assert!(!matches!(result, Err(AppError::Other(_))));
        assert_eq!(response.status, 404);
    }
}
