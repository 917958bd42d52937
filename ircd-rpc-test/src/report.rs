use std::future::Future;

pub struct CaseResult {
    pub name: &'static str,
    pub error: Option<String>,
}

/// Run one case, capturing its failure as text.
pub async fn case<F>(name: &'static str, fut: F) -> CaseResult
where
    F: Future<Output = anyhow::Result<()>>,
{
    CaseResult {
        name,
        error: fut.await.err().map(|e| format!("{e:#}")),
    }
}

/// Print a scenario's results and fail if any case failed.
pub fn print(title: &str, cases: &[CaseResult]) -> anyhow::Result<()> {
    println!("=== {title} ===");

    let total = cases.len();
    let mut passed = 0;
    for case in cases {
        match &case.error {
            None => {
                println!("  PASS  {}", case.name);
                passed += 1;
            }
            Some(e) => println!("  FAIL  {}: {e}", case.name),
        }
    }

    println!();
    println!("{passed}/{total} passed");

    if passed < total {
        anyhow::bail!("{title}: {} case(s) failed", total - passed);
    }
    Ok(())
}
