pub mod descriptor;
pub mod directive;
pub mod errors;
pub mod hooks;
pub mod ids;
pub mod state;
pub mod subscription;
pub mod transport;

pub use descriptor::{ApiDescriptor, EventShape, MethodShape};
pub use directive::{compile, Binding, ParseSkip, Role};
pub use errors::{BindingError, EmitError, ErrorRecord, HandlerError, TransportError, EMIT_TIMEOUT};
pub use hooks::{handler_fn, is_veto, rejects, Handler, HandlerTable};
pub use ids::{ComponentId, ConnectionId};
pub use state::{StateTree, StateWatch};
pub use subscription::Subscription;
pub use transport::{event_handler, ConnectParams, Connection, EventHandler, ListenerId, Responder, Transport};
