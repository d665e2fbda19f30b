use imagefleet_core::compute_tags;

/// バージョンから付与されるタグを1行ずつ出力
pub fn handle(version: &str) -> anyhow::Result<()> {
    let tags = compute_tags(version)?;
    for tag in tags.iter() {
        println!("{}", tag);
    }
    Ok(())
}
