//! Minimal end-to-end demo: a math server and client over the in-memory
//! transport.
//!
//! Run with: `cargo run --example math`

use link_rpc::{
    create_memory_transport, ClientOptions, MemoryBroker, MethodDef, RpcClient, RpcServer,
    ServerOptions,
};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> link_rpc::Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let transport = create_memory_transport(broker);

    let server = RpcServer::new(transport.clone(), ServerOptions::new());
    server.bind(
        MethodDef::new("add").param_names(["a", "b"]),
        |args: Vec<Value>| async move {
            Ok(json!(
                args[0].as_f64().unwrap_or(0.0) + args[1].as_f64().unwrap_or(0.0)
            ))
        },
    )?;
    server.bind(
        MethodDef::new("sub").param_names(["a", "b"]),
        |args: Vec<Value>| async move {
            Ok(json!(
                args[0].as_f64().unwrap_or(0.0) - args[1].as_f64().unwrap_or(0.0)
            ))
        },
    )?;
    server.listen("requests/math").await?;

    let client = RpcClient::connect(transport, "requests/math", ClientOptions::new()).await?;

    // Positional params.
    let sum = client.call("add", vec![json!(2), json!(3)]).await?;
    println!("add(2, 3) = {sum}");

    // Named params arrive at the handler in declared order.
    let diff = client.call("sub", json!({ "b": 3, "a": 10 })).await?;
    println!("sub(a: 10, b: 3) = {diff}");

    // A batch answers with one entry per request, in order.
    let batch = client
        .call_batch(vec![
            json!({ "method": "add", "params": [1, 1] }),
            json!({ "method": "nope" }),
            json!({ "method": "sub", "params": [1, 1] }),
        ])
        .await?;
    println!("batch = {batch:?}");

    Ok(())
}
