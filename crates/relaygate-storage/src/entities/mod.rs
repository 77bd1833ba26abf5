pub mod budgets;
pub mod customers;
pub mod global_config;
pub mod internal_events;
pub mod keys;
pub mod plugin_configs;
pub mod providers;
pub mod rate_limits;
pub mod teams;
pub mod virtual_keys;
