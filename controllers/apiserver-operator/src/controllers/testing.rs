//! Kubernetes client double for controller tests.

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use kube::Client;
use serde_json::json;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// Requests seen by the client double.
#[derive(Debug, Clone, Default)]
pub struct Requests(Arc<Mutex<Vec<(Method, String)>>>);

impl Requests {
    /// Paths of every DELETE request, in order.
    pub fn deletes(&self) -> Vec<String> {
        self.0
            .lock()
            .expect("requests")
            .iter()
            .filter(|(method, _)| *method == Method::DELETE)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("response")
}

/// Client answering DELETE with `status` and any other request with a
/// successful empty `Status`.
pub fn client_answering_deletes(status: StatusCode) -> (Client, Requests) {
    let requests = Requests::default();
    let recorded = requests.clone();
    let service = tower::service_fn(move |request: Request<kube::client::Body>| {
        let recorded = recorded.clone();
        async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            recorded.0.lock().expect("requests").push((method.clone(), path.clone()));

            let response = if method == Method::DELETE && !status.is_success() {
                let reason = if status == StatusCode::NOT_FOUND { "NotFound" } else { "Forbidden" };
                json_response(
                    status,
                    json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "metadata": {},
                        "status": "Failure",
                        "message": format!("{path} {reason}"),
                        "reason": reason,
                        "code": status.as_u16(),
                    }),
                )
            } else {
                json_response(
                    StatusCode::OK,
                    json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "metadata": {},
                        "status": "Success",
                    }),
                )
            };
            Ok::<_, Infallible>(response)
        }
    });
    (Client::new(service, "default"), requests)
}
