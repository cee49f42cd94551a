//! Network diagnostic probes behind an SSRF-safe target validator
//!
//! 提供网络诊断工具：Ping、DNS 查询、HTTP 分析、TLS 证书检查。
//! 所有目标在探测前都会经过校验，拒绝内网地址与本地主机。

mod cache;
mod config;
mod error;
mod services;
mod types;

pub use cache::ResultCache;
pub use config::{
    CacheConfig, HttpConfig, PingConfig, ProbeConfig, SecurityConfig, TimeoutConfig,
};
pub use error::{ProbeErrorKind, ProbeFailure, RejectReason, ToolboxError, ToolboxResult};
pub use services::{
    ConnectivityProber, DnsProber, HostResolver, HttpProber, ProbeReport, ProbeService, Prober,
    SafeResolver, SystemResolver, TargetValidator, TlsProber, ValidatedTarget, ValidationVerdict,
};
pub use types::{
    ConnectivityResult, DnsResult, HttpResult, ProbeKind, ProbeOutcome, TlsResult,
};
