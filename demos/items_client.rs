//! Declares a small slice of the JSONPlaceholder API and calls it.
//!
//! This example shows how to:
//! - Declare methods with path, query, header and body parameters
//! - Build a client with retries and a feature executor
//! - Call methods and read response metadata
//! - Serve a featured method from a stub instead of the network
//!
//! Run with: `cargo run --example items_client`

use declaro::{
    args, ApiSpec, Client, EndpointSpec, Error, FeatureToggles, RawResponse, RetryStrategy,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Comment {
    id: u32,
    email: String,
    body: String,
}

fn posts_api() -> ApiSpec {
    ApiSpec::new("PostsApi")
        .header("accept", "application/json")
        .endpoint(
            EndpointSpec::get("get_post", "/posts/{id}")
                .path("id")
                .returns::<Post>(),
        )
        .endpoint(
            EndpointSpec::get("posts_by_user", "/posts")
                .query("userId")
                .returns::<Vec<Post>>(),
        )
        .endpoint(
            EndpointSpec::post("create_post", "/posts")
                .header_param("x-request-id")
                .body()
                .returns::<Post>(),
        )
        .endpoint(
            EndpointSpec::get("comments", "/posts/{id}/comments")
                .path("id")
                .feature("comments")
                .returns::<Vec<Comment>>(),
        )
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("declaro=debug,items_client=info")
        .init();

    let stubbed_comments = RawResponse::json(serde_json::json!([
        { "id": 1, "email": "offline@example.com", "body": "served without a request" }
    ]));

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .timeout(Duration::from_secs(10))
        .retry_strategy(RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_retries: 3,
            jitter: true,
        })
        .feature_executor(FeatureToggles::new().stub("comments", stubbed_comments))
        .build(posts_api())?;

    println!("=== Path parameter ===");
    let post = client.call::<Post>("get_post", args![1]).await?;
    println!("Post {}: {}", post.id, post.title);
    println!("Latency: {:?}, attempts: {}", post.latency, post.attempts);
    println!();

    println!("=== Query parameter ===");
    let posts = client.call::<Vec<Post>>("posts_by_user", args![2]).await?;
    println!("User 2 wrote {} posts", posts.len());
    println!();

    println!("=== Header parameter and body ===");
    let new_post = NewPost {
        title: "Declared, not written".to_string(),
        body: "This request was built from a method declaration.".to_string(),
        user_id: 1,
    };
    let created = client
        .call::<Post>("create_post", args!["demo-1", new_post])
        .await?;
    println!("Created post {} ({})", created.id, created.status);
    println!();

    println!("=== Stubbed feature ===");
    let comments = client.call::<Vec<Comment>>("comments", args![1]).await?;
    for comment in comments.iter() {
        println!("{}: {}", comment.email, comment.body);
    }
    println!();

    println!("=== Errors ===");
    match client.call::<Post>("get_post", args![]).await {
        Err(e @ Error::ArgumentCount { .. }) => println!("Rejected before sending: {}", e),
        other => println!("Unexpected: {:?}", other.map(|r| r.data)),
    }
    match client.call::<Post>("get_post", args![100_000]).await {
        Err(e) => println!("Status {:?}: {}", e.status(), e),
        Ok(post) => println!("Unexpectedly found {:?}", post.data),
    }

    Ok(())
}
