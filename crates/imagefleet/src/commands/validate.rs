use colored::Colorize;
use imagefleet_core::{parse_registry_file, resolve_registry_path};
use std::path::Path;

pub fn handle(registry_path: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "イメージレジストリを検証中...".blue());

    let registry_path = match resolve_registry_path(registry_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ イメージレジストリが見つかりません".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "レジストリ: {}",
        registry_path.display().to_string().cyan()
    );

    match parse_registry_file(&registry_path) {
        Ok(registry) => {
            println!("{}", "✓ イメージレジストリは正常です！".green().bold());
            println!();
            println!("サマリー:");
            println!("  ホスト: {}", registry.host());
            println!(
                "  アプリ: {}個 / イメージ: {}個",
                registry.app_count(),
                registry.image_count()
            );
            for (app_name, descriptors) in registry.apps() {
                println!("    - {}", app_name.cyan());
                for descriptor in descriptors {
                    println!(
                        "        {} ({}) {}",
                        descriptor.qualified_name(),
                        descriptor.display_name,
                        descriptor.dockerfile_path.display().to_string().dimmed()
                    );
                }
            }
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
