//! takt-bootstrap - 统一服务启动骨架
//!
//! 编排器在这里显式构造并注入给服务代码，没有全局单例；
//! 进程退出前通过 shutdown 句柄把后台刷新队列排空。

mod infrastructure;
mod runtime;
mod shutdown;

pub use infrastructure::*;
pub use runtime::*;
pub use shutdown::*;
