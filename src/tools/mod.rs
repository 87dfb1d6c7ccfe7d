//! 工具：工作区内的文件修改与回滚

pub mod code_edit;

pub use code_edit::{EditError, EditSnapshot, FileEditor, FileOperation};
