pub mod application;
pub mod convertors;
pub mod endpoint;
pub mod lifespan;
pub mod mount;
pub mod path;
pub mod route;
pub mod router;
pub mod url;

pub use application::{Application, ApplicationBuilder};
pub use convertors::{Convertor, ConvertorError, ConvertorRegistry, ParamValue, register_url_convertor};
pub use endpoint::{Endpoint, WebSocketEndpoint};
pub use lifespan::{EventType, Lifespan, LifespanHook, LifespanScope};
pub use mount::{Host, Mount};
pub use path::{CompiledPath, PathCompileError, compile_path};
pub use route::{Match, Route, RouteBuildError, RouteNode, WebSocketRoute};
pub use router::Router;
pub use url::{Protocol, UrlPath, UrlPathError};
