mod status;
mod version;

pub use self::status::*;
pub use self::version::*;
