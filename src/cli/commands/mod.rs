//! One module per subcommand, each exposing `execute`.

pub mod add;
pub mod calibrate;
pub mod completions;
pub mod convert;
pub mod create;
pub mod info;
pub mod keyfile;
pub mod ls;
pub mod rm;
pub mod show;
