pub mod argocd;
pub mod argocdexport;

pub use argocd::*;
pub use argocdexport::*;

pub static ARGOCD_FINALIZER: &str = "argocd.argoproj.io/cluster-resources";
