use crate::commands::{load_config, open_store, runtime, CommandResult, Failure};

pub fn run() -> CommandResult {
    match apply() {
        Ok(database_url) => {
            CommandResult::success("migrate", format!("applied pending migrations to `{database_url}`"))
        }
        Err(failure) => failure.into_result("migrate"),
    }
}

fn apply() -> Result<String, Failure> {
    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        pool.close().await;
        Ok(config.database.url.clone())
    })
}
