pub mod argocd;
pub mod argocd_controller;
pub mod converge;
