use anyhow::Result;
use pedvol::{PipelineConfig, run_pipeline};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::RunArgs) -> Result<()> {
    let mut config = PipelineConfig::from_path(&args.config)?;
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if args.no_cv {
        config.analysis.cross_validate = false;
    }

    log::info!("[run] estimating street volumes from {}", args.config.display());
    let output = run_pipeline(&config)?;

    let d = &output.diagnostics;
    println!("streets written      {}", output.table.len());
    println!("  observed           {}", output.observed);
    println!("  predicted          {}", output.predicted);
    println!("  without estimate   {}", output.unpredicted);
    println!("training rows        {}", d.n_obs);
    println!("dispersion           {:.2}", d.dispersion);
    println!("pseudo-R² ({})  {:.3}", d.pseudo_r2_model, d.pseudo_r2);
    println!("RMSE / MAE           {:.1} / {:.1}", d.rmse, d.mae);
    match &d.residual_moran {
        Some(moran) => println!("residual Moran's I   {:.4} (p = {:.4} randomisation, {:.4} permutation)",
            moran.statistic, moran.p_randomization, moran.p_permutation),
        None => println!("residual Moran's I   n/a"),
    }
    if let Some(cv) = &output.cross_validation {
        println!("LOOCV RMSE / MAE     {:.1} / {:.1} over {} fits ({} failed)", cv.rmse, cv.mae, cv.fits, cv.failed.len());
    }
    println!("output               {}", config.output.display());
    Ok(())
}
