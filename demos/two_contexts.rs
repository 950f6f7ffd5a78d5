//! Two execution contexts sharing one storage namespace
//!
//! Context B runs a sync listener while context A logs in, edits the
//! profile and pays. B sees every change without writing anything itself.

use feeportal_core::{AuthService, PortalConfig, ProfileUpdate, StorageNamespace};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[tokio::main]
async fn main() -> feeportal_core::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = PortalConfig::new().with_payment_delay(Duration::from_millis(300));
    let namespace = StorageNamespace::open(&config).await?;

    let tab_a = AuthService::attach(&namespace, &config).await?;
    let tab_b = Arc::new(AuthService::attach(&namespace, &config).await?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let listener = {
        let tab_b = Arc::clone(&tab_b);
        tokio::spawn(async move { tab_b.run_sync(shutdown_rx).await })
    };

    let _payments = tab_a.observe_payments(|event| {
        println!("tab A: payment completed for {}", event.student_id);
    });

    tab_a.login("bob@student.edu", "password123").await?;
    tab_a
        .update_profile(ProfileUpdate::new().name("Robert Smith"))
        .await?;
    tab_a.pay_fees().await?;

    // Give the listener a moment to drain the feed
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("tab B sees:");
    for student in tab_b.list_all().await {
        println!(
            "  [{}] {} <{}> fees {}",
            student.id,
            student.name,
            student.email,
            if student.fees_paid { "paid" } else { "due" }
        );
    }

    let _ = shutdown_tx.send(());
    if let Ok(result) = listener.await {
        result?;
    }
    tab_a.close().await?;
    Ok(())
}
