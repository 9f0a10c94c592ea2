pub mod chat;
pub mod command;
pub mod live;
pub mod tools;

pub use command::{
    AccentDetail, Command, CommandKind, NavigateDetail, ScrollAction, ScrollDetail, ThemeDetail,
};
pub use tools::FunctionDeclaration;
