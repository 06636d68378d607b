/// This file contains the hidden `exacat` listers behind init flags
use super::{CloudProvider, Result, VersionsCatalog};

/// Print the supported cloud providers
pub fn providers() -> Result<()> {
    for p in CloudProvider::all() {
        println!("{}", p);
    }
    Ok(())
}

/// Print the catalog versions and what the aliases point at
pub fn versions() -> Result<()> {
    let catalog = VersionsCatalog::load()?;
    for v in catalog.names() {
        println!("{}", v);
    }
    for (alias, target) in catalog.aliases() {
        println!("{} -> {}", alias, target);
    }
    Ok(())
}

/// Print the cloud permissions a deployment needs
pub fn permissions(provider: CloudProvider) -> Result<()> {
    let needs = match provider {
        CloudProvider::Aws => "\
ec2:RunInstances, ec2:TerminateInstances, ec2:StartInstances, ec2:StopInstances,
ec2:Describe*, ec2:CreateSecurityGroup, ec2:AuthorizeSecurityGroupIngress,
ec2:CreateVolume, ec2:AttachVolume, ec2:DeleteVolume, ec2:CreateTags,
ec2:ImportKeyPair, ec2:DeleteKeyPair",
        CloudProvider::Azure => "\
Microsoft.Compute/virtualMachines/*, Microsoft.Network/networkInterfaces/*,
Microsoft.Network/publicIPAddresses/*, Microsoft.Network/networkSecurityGroups/*,
Microsoft.Compute/disks/*, Microsoft.Resources/resourceGroups/*",
        CloudProvider::Gcp => "\
compute.instances.*, compute.disks.*, compute.firewalls.*, compute.networks.*,
compute.subnetworks.*, compute.addresses.*",
        CloudProvider::Hetzner => "a read/write API token for the target project",
        CloudProvider::DigitalOcean => "a read/write personal access token",
        CloudProvider::Exoscale => "an API key with compute permissions",
        CloudProvider::Oci => "\
manage instance-family, manage volume-family, manage virtual-network-family
in the target compartment",
        CloudProvider::Libvirt => "membership in the libvirt group on the host",
    };
    println!("{} requires:\n{}", provider, needs);
    Ok(())
}
