//! HTTP请求处理器模块
//! 
//! 实现所有API端点的处理逻辑

pub mod auth;
pub mod cache;
pub mod health;
pub mod valuations;
