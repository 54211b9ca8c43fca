pub mod media;
pub mod model;
pub mod snowflake;
pub mod util;
