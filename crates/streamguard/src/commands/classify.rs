use streamguard_core::classify_disconnect_reason;

use crate::cli::ClassifyArgs;
use crate::error::CliError;

pub fn handle(args: &ClassifyArgs) -> Result<(), CliError> {
    let classification = classify_disconnect_reason(&args.reason);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    println!("type:        {}", classification.kind);
    println!("severity:    {}", classification.severity);
    println!(
        "reconnect:   {}",
        if classification.requires_reconnection { "yes" } else { "no" }
    );
    println!("description: {}", classification.description);
    Ok(())
}
