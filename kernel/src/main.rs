//! EmberOS kernel binary: Multiboot2 entry and boot sequence.
//!
//! The boot stub builds a transitional page directory with 4 MiB pages
//! mapping the kernel window both identity and at 3 GiB, enables paging,
//! and jumps into the high half before `kmain` brings the subsystems up in
//! dependency order.

#![cfg_attr(all(target_arch = "x86", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "x86", target_os = "none"), no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod boot {
    extern crate alloc;

    use alloc::{boxed::Box, sync::Arc};

    use ember_kernel::fs::{blockdev::RamDisk, fat::FatFileSystem};
    use ember_kernel::mm::{MemoryRegion, MemoryRegionKind};
    use ember_kernel::{drivers, irq, log_service, mm, println, process, sched, serial};

    // Multiboot2 header, boot stack, and the entry stub. The stub runs at
    // its load address (paging off), so every symbol it touches is
    // adjusted down by the kernel base; it fills the boot page directory
    // with 4 MiB PSE mappings (identity + kernel window), turns paging
    // on, and jumps to the high half.
    core::arch::global_asm!(
        r#"
        .section .multiboot2, "a"
        .align 8
        mb2_header_start:
            .long 0xE85250D6
            .long 0
            .long mb2_header_end - mb2_header_start
            .long -(0xE85250D6 + (mb2_header_end - mb2_header_start))
            .short 0
            .short 0
            .long 8
        mb2_header_end:

        .section .bss
        .align 4096
        boot_page_directory:
            .skip 4096
        boot_stack_bottom:
            .skip 16384
        boot_stack_top:

        .section .boot.text, "ax"
        .global _start
        _start:
            cli
            // Save the Multiboot2 info pointer (physical).
            mov esi, ebx

            // Physical address of the boot directory.
            mov edi, offset boot_page_directory
            sub edi, 0xC0000000

            // Identity + high-half map the first 16 MiB with 4 MiB pages:
            // entries 0..3 and 768..771 -> frames 0..3 (PS | RW | P).
            xor ecx, ecx
        1:
            mov eax, ecx
            shl eax, 22
            or eax, 0x83
            mov [edi + ecx * 4], eax
            mov [edi + 0xC00 + ecx * 4], eax
            inc ecx
            cmp ecx, 4
            jl 1b

            // CR4.PSE on, CR3 = boot directory, CR0.PG on.
            mov eax, cr4
            or eax, 0x10
            mov cr4, eax
            mov cr3, edi
            mov eax, cr0
            or eax, 0x80000000
            mov cr0, eax

            // Jump into the high half through an absolute address.
            mov eax, offset boot_high_entry
            jmp eax

        .section .text
        boot_high_entry:
            mov esp, offset boot_stack_top
            push esi
            call kmain
        2:
            hlt
            jmp 2b
        "#
    );

    /// High-half Rust entry. `mbi_phys` is the physical address of the
    /// Multiboot2 information structure.
    #[no_mangle]
    pub extern "C" fn kmain(mbi_phys: u32) -> ! {
        mm::set_phys_offset(mm::KERNEL_SPACE_START as usize);
        serial::init();
        log_service::init(log::LevelFilter::Info);
        println!("[BOOT] EmberOS starting");

        ember_kernel::arch::x86::gdt::init();
        ember_kernel::arch::x86::idt::init();
        ember_kernel::arch::x86::pic::init();

        let mut regions = [MemoryRegion::new(0, 0, MemoryRegionKind::Reserved); 32];
        let region_count = read_memory_map(mbi_phys, &mut regions);
        if mm::init(&regions[..region_count]).is_err() {
            irq::halt_system("memory init failed");
        }

        irq::init();
        ember_kernel::arch::x86::timer::init();
        drivers::keyboard::init();

        mount_root_filesystem();

        process::init();
        spawn_boot_processes();

        println!("[BOOT] entering scheduler");
        sched::start()
    }

    /// Collect `(base, length, type)` records from the boot environment.
    fn read_memory_map(mbi_phys: u32, out: &mut [MemoryRegion; 32]) -> usize {
        use multiboot2::{BootInformation, BootInformationHeader, MemoryAreaType};

        let ptr = mm::phys_to_virt(mbi_phys) as *const BootInformationHeader;
        // SAFETY: the bootloader hands a well-formed info structure whose
        // physical range lies inside the mapped kernel window.
        let info = match unsafe { BootInformation::load(ptr) } {
            Ok(info) => info,
            Err(_) => irq::halt_system("bad multiboot2 info"),
        };

        let mut count = 0;
        if let Some(map) = info.memory_map_tag() {
            for area in map.memory_areas() {
                if count == out.len() {
                    break;
                }
                let kind = match MemoryAreaType::from(area.typ()) {
                    MemoryAreaType::Available => MemoryRegionKind::Usable,
                    MemoryAreaType::AcpiAvailable => MemoryRegionKind::AcpiReclaimable,
                    MemoryAreaType::ReservedHibernate => MemoryRegionKind::AcpiNvs,
                    MemoryAreaType::Defective => MemoryRegionKind::Defective,
                    _ => MemoryRegionKind::Reserved,
                };
                out[count] = MemoryRegion::new(area.start_address(), area.size(), kind);
                count += 1;
            }
        }
        println!("[BOOT] {} memory regions", count);
        count
    }

    /// Mount the root filesystem: an ATA disk when one responds, a freshly
    /// formatted RAM disk otherwise. An unrecognized disk is formatted.
    fn mount_root_filesystem() {
        let fs = match drivers::ata::AtaDevice::probe(0) {
            Some(device) => match FatFileSystem::mount(device) {
                Ok(fs) => fs,
                Err(_) => match drivers::ata::AtaDevice::probe(0) {
                    Some(device) => match FatFileSystem::format(device, 1) {
                        Ok(fs) => fs,
                        Err(_) => ram_fallback(),
                    },
                    None => ram_fallback(),
                },
            },
            None => ram_fallback(),
        };
        if ember_kernel::fs::mount_root(Arc::new(fs)).is_err() {
            irq::halt_system("root mount failed");
        }
    }

    fn ram_fallback() -> FatFileSystem {
        println!("[BOOT] no usable disk, formatting RAM disk");
        let disk = Box::new(RamDisk::new("rd0", 2048));
        match FatFileSystem::format(disk, 1) {
            Ok(fs) => fs,
            Err(_) => irq::halt_system("ramdisk format failed"),
        }
    }

    /// Launch the first processes: `/bin/init` from disk when present,
    /// the embedded demos otherwise.
    fn spawn_boot_processes() {
        if process::loader::exec("/bin/init", None).is_ok() {
            println!("[BOOT] started /bin/init");
            return;
        }

        use ember_kernel::userspace::programs;
        let spawn = |entry: extern "C" fn(), name: &str, priority: u32| {
            match process::lifecycle::create_user_process(entry as usize as u32, name, priority) {
                Ok(pid) => println!("[BOOT] spawned {} (pid {})", name, pid),
                Err(e) => println!("[BOOT] failed to spawn {}: {}", name, e),
            }
        };
        spawn(programs::counter_high, "H", 1);
        spawn(programs::counter_mid, "M", 5);
        spawn(programs::counter_low, "L", 9);
        spawn(programs::fork_demo, "forkdemo", 5);
        spawn(programs::echo_demo, "echo", 5);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn main() {
    eprintln!("ember-kernel is a bare-metal image; build for i686-unknown-none and boot it");
}
