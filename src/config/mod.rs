pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    filter_api_keys, Config, DedupConfig, GatewayConfig, LarkConfig, OpenAiConfig, RoleConfig,
    StreamConfig,
};
