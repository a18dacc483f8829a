use scalable_tsdf::storage::{
    compression::{BincodeCompression, BytesCompression, Compression},
    load_from_path, prelude::*, VolumeRecord,
};

fn main() {
    let args: Vec<_> = std::env::args().collect();
    let volume_path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: {} <volume file>", args[0]);
            std::process::exit(1);
        }
    };

    println!("Loading {}", volume_path);

    let volume = match load_from_path(volume_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load {}: {}", volume_path, e);
            std::process::exit(1);
        }
    };
    let records = volume.download_records();
    println!("{} blocks\n", records.len());

    println!("Compressing with Snappy: \n");
    measure_compression_rate(Snappy, &records);

    println!("Compressing with LZ4: \n");
    measure_compression_rate(Lz4 { level: 10 }, &records);
}

fn measure_compression_rate<B: BytesCompression>(bytes_compression: B, records: &Vec<VolumeRecord>) {
    let voxels: usize = records.iter().map(|r| r.block.tsdf.len()).sum();
    let source_size_bytes = voxels * std::mem::size_of::<Voxel>();

    let compressed_size_bytes = match BincodeCompression::new(bytes_compression).compress(records) {
        Ok(c) => c.compressed_data.len(),
        Err(e) => {
            eprintln!("compression failed: {}", e);
            return;
        }
    };

    println!(
        "source = {} bytes, compressed = {} bytes; rate = {:.1}%\n",
        source_size_bytes,
        compressed_size_bytes,
        100.0 * (compressed_size_bytes as f32 / source_size_bytes as f32)
    );
}
