pub mod anonymous;
pub mod authenticated;
pub mod catalog;
pub mod dispatch;
pub mod sanitize;

pub use anonymous::AnonymousClient;
pub use authenticated::AuthenticatedClient;
pub use catalog::{CatalogError, ModelCatalog, ModelClass};
pub use dispatch::{
    AnonymousGateway, AuthenticatedGateway, ClientBuildError, ClientError, DispatchError,
    DispatchPolicy, DispatchRoute, GatewayFuture, GenerationEngine, GenerationReply,
    assemble_conversation, choose_route,
};
pub use sanitize::sanitize_markdown;
