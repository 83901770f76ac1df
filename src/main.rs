use clap::{Parser, Subcommand};
use color_eyre::eyre;
use warpsim::{
    Device, GPUConfig, PerformanceAnalyzer, SchedulerComparison, SchedulingPolicy, Workload,
    WorkloadScheduler,
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a few workloads under FIFO scheduling
    Basic,
    /// Compare all four scheduling policies on a mixed batch
    Schedulers,
    /// Simulate the layers of a ResNet-like network inference
    Ml,
    /// Mixed-size workload benchmark
    Bench,
    /// Run every simulation mode in sequence
    All,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Options {
    #[command(subcommand)]
    command: Option<Command>,
}

fn run_basic() {
    println!("==============================================");
    println!("  BASIC SIMULATION");
    println!("==============================================");

    let device = Device::new(GPUConfig {
        num_compute_units: 16,
        ..GPUConfig::default()
    });
    device.print_device_info();

    device.submit_workload(Workload::matrix_multiply(512, 512, 512));
    device.submit_workload(Workload::vector_add(1024 * 1024));
    device.submit_workload(Workload::reduction(1024 * 1024));

    device.execute_workloads();
    device.wait_for_completion();

    let analyzer = device.performance_analyzer().lock();
    analyzer.print_detailed_report();
    analyzer.export_to_csv("basic_simulation_results.csv");
}

fn run_scheduler_comparison() {
    println!("==============================================");
    println!("  SCHEDULER COMPARISON");
    println!("==============================================");

    let policies = [
        SchedulingPolicy::Fifo,
        SchedulingPolicy::Priority,
        SchedulingPolicy::ShortestJobFirst,
        SchedulingPolicy::RoundRobin,
    ];

    let mut comparison = SchedulerComparison::new();
    for policy in policies {
        println!("\nTesting {policy} scheduler...");

        let device = Device::new(GPUConfig {
            num_compute_units: 16,
            ..GPUConfig::default()
        });
        device.set_scheduler(WorkloadScheduler::new(policy));

        let mut small_matmul = Workload::matrix_multiply(256, 256, 256);
        small_matmul.set_priority(3);
        let mut large_matmul = Workload::matrix_multiply(1024, 1024, 1024);
        large_matmul.set_priority(1);
        let mut conv = Workload::convolution(4, 64, 224, 224);
        conv.set_priority(2);
        let mut vecadd = Workload::vector_add(2 * 1024 * 1024);
        vecadd.set_priority(2);
        let mut reduction = Workload::reduction(1024 * 1024);
        reduction.set_priority(3);

        device.submit_workload(small_matmul);
        device.submit_workload(large_matmul);
        device.submit_workload(conv);
        device.submit_workload(vecadd);
        device.submit_workload(reduction);

        device.execute_workloads();
        device.wait_for_completion();

        let snapshot: PerformanceAnalyzer = device.performance_analyzer().lock().clone();
        comparison.add_analyzer(policy.to_string(), snapshot);
    }

    comparison.print_comparison();
    comparison.export_comparison_csv("scheduler_comparison.csv");
}

fn run_ml_workloads() {
    println!("==============================================");
    println!("  MACHINE LEARNING WORKLOAD SIMULATION");
    println!("==============================================");

    let device = Device::new(GPUConfig {
        num_compute_units: 32,
        device_name: "GPU Simulator - ML Workload Profile".to_string(),
        ..GPUConfig::default()
    });
    device.print_device_info();
    println!("Simulating ResNet-like network inference...\n");

    let mut conv1 = Workload::convolution(1, 64, 224, 224);
    conv1.set_priority(5);
    device.submit_workload(conv1);

    // residual blocks and downsampling stages
    device.submit_workload(Workload::convolution(1, 64, 112, 112));
    device.submit_workload(Workload::convolution(1, 64, 112, 112));
    device.submit_workload(Workload::convolution(1, 128, 56, 56));
    device.submit_workload(Workload::convolution(1, 128, 56, 56));
    device.submit_workload(Workload::convolution(1, 256, 28, 28));

    // classifier head
    let mut fc = Workload::matrix_multiply(1, 1000, 2048);
    fc.set_priority(10);
    device.submit_workload(fc);

    device.execute_workloads();
    device.wait_for_completion();

    let analyzer = device.performance_analyzer().lock();
    analyzer.print_detailed_report();
    analyzer.export_to_csv("ml_workload_results.csv");
}

fn run_bench() {
    println!("==============================================");
    println!("  CUSTOM WORKLOAD BENCHMARK");
    println!("==============================================");

    let device = Device::new(GPUConfig {
        num_compute_units: 24,
        ..GPUConfig::default()
    });

    let mut workloads = Vec::new();
    for _ in 0..3 {
        workloads.push(Workload::vector_add(512 * 1024));
    }
    for _ in 0..3 {
        workloads.push(Workload::matrix_multiply(256, 256, 256));
    }
    for _ in 0..2 {
        workloads.push(Workload::convolution(2, 32, 128, 128));
    }
    for (i, workload) in workloads.iter_mut().enumerate() {
        workload.set_priority((i % 5) as i32);
    }
    for workload in workloads {
        device.submit_workload(workload);
    }

    device.execute_workloads();
    device.wait_for_completion();

    let analyzer = device.performance_analyzer().lock();
    analyzer.print_summary();
    if let Some(fastest) = analyzer.fastest_workload() {
        println!("Fastest workload: {}", fastest.workload_name);
    }
    if let Some(slowest) = analyzer.slowest_workload() {
        println!("Slowest workload: {}", slowest.workload_name);
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let options = Options::parse();
    match options.command.unwrap_or(Command::All) {
        Command::Basic => run_basic(),
        Command::Schedulers => run_scheduler_comparison(),
        Command::Ml => run_ml_workloads(),
        Command::Bench => run_bench(),
        Command::All => {
            run_basic();
            run_scheduler_comparison();
            run_ml_workloads();
            run_bench();
        }
    }
    Ok(())
}
