use kube::CustomResourceExt;
use pubsub_k8s::crd::PullSubscription;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&PullSubscription::crd())?);
    Ok(())
}
