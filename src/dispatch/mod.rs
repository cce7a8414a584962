//! 接收端分发

pub mod dispatcher;

pub use dispatcher::Dispatcher;
