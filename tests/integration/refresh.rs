//! Refresh passes over dashboard files.

use anyhow::Result;
use cardtpl_cli::config::{EngineConfig, FetchConfig};
use cardtpl_cli::dashboard::{Dashboard, DirectorySink};
use cardtpl_cli::refresh::{SaveSummary, refresh, save_views};
use cardtpl_cli::source::{FetchError, HttpFetcher};
use cardtpl_cli::test_utils::{init_test_logging, read_json, write_file};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `body` to every connection.
async fn serve_forever(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        fetch: FetchConfig {
            retries: 0,
            timeout_secs: 5,
            ..FetchConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_refresh_with_file_and_http_partials() -> Result<()> {
    init_test_logging(None);
    let temp = TempDir::new()?;
    let base = serve_forever("Status: {{ state }}").await;

    write_file(temp.path(), "partials/title.eta", "<%= it.name %> room");
    let dashboard_path = write_file(
        temp.path(),
        "dashboard.yaml",
        &format!(
            r#"
title: Home
partials:
  title: {{ url: partials/title.eta, dialect: eta }}
  status: {{ url: "{base}/status.jinja" }}
  broken: {{ url: partials/missing.jinja }}
templates:
  room_header:
    type: markdown
    title: '{{{{ include_partial(partial="title", name=context.room) }}}}'
    content: '{{{{ include_partial(partial="status", state=context.state) }}}}'
views:
  - title: Ground Floor
    cards:
      - ref: room_header
        context: {{ room: Kitchen, state: busy }}
"#
        ),
    );

    let dashboard = Dashboard::load(&dashboard_path).await?;
    let config = fast_config();
    let fetcher = HttpFetcher::new(temp.path(), &config.fetch)?;
    let (resolved, report) = refresh(&dashboard, &fetcher, &config).await?;

    let card = &resolved.views[0]["cards"][0];
    assert_eq!(card["title"], json!("Kitchen room"));
    assert_eq!(card["content"], json!("Status: busy"));
    assert_eq!(resolved.extra["title"], json!("Home"));

    assert_eq!(report.partials, 2);
    assert_eq!(report.fetch_failures.len(), 1);
    assert_eq!(report.fetch_failures[0].name, "broken");
    assert!(matches!(report.fetch_failures[0].error, FetchError::Io { .. }));
    assert!(report.node_failures.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_views_written_once_per_change() -> Result<()> {
    let temp = TempDir::new()?;
    let dashboard = Dashboard::parse(
        r#"
templates:
  chip: { type: chip, label: "{{ context.label }}" }
views:
  - path: main
    cards: [{ ref: chip, context: { label: one } }]
  - title: Second View
    cards: []
"#,
        "inline.yaml",
    )?;
    let config = fast_config();
    let fetcher = HttpFetcher::new(temp.path(), &config.fetch)?;
    let sink = DirectorySink::new(temp.path().join("out"));

    let (resolved, _) = refresh(&dashboard, &fetcher, &config).await?;
    assert_eq!(save_views(&resolved, &sink).await?, SaveSummary { written: 2, unchanged: 0 });

    let main = read_json(&sink.path_for("main"));
    assert_eq!(main["cards"][0]["label"], json!("one"));
    assert!(sink.path_for("second-view").exists());

    // A second pass over the output changes nothing on disk.
    let (again, _) = refresh(&resolved, &fetcher, &config).await?;
    assert_eq!(save_views(&again, &sink).await?, SaveSummary { written: 0, unchanged: 2 });
    Ok(())
}
