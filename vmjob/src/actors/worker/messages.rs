use crate::error;
use crate::job::JobView;
use tokio::sync::oneshot;

pub enum WorkerMessage {
    GetStatus {
        response: oneshot::Sender<error::Result<JobView>>,
    },
    Kill {
        response: oneshot::Sender<error::Result<()>>,
    },
}
