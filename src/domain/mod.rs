// Core model for recurviz: values, invocation records, the graph store,
// the resource guard and the instrumentation hook.

pub mod ast;
pub mod guard;
pub mod invocation;
pub mod session;
pub mod store;
pub mod value;
