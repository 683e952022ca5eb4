use argocd_operator::api::v1alpha1::{ArgoCD, ArgoCDExport};
use kube::CustomResourceExt as _;

fn main() {
    print!("{}", serde_yaml::to_string(&ArgoCD::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&ArgoCDExport::crd()).unwrap());
}
